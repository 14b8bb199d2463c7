//! Decoding positions from NMEA 0183 sentences.
//!
//! Only the "recommended minimum" sentence (`$--RMC`) carries the fix used here:
//!
//! ```text
//! $GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A
//!        time   | lat      |  lng      |
//!               status     hemisphere  hemisphere
//! ```

use std::fmt::Display;

use crate::gps::LocationFix;

/// Why a line did not produce a fix.
/// These are the expected outcome for most lines a receiver sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ignored {
    /// Not a recommended minimum sentence.
    SentenceType,

    /// The checksum did not match the sentence.
    Checksum,

    /// The receiver says it has no valid fix.
    NoFix,

    /// A field was missing or could not be parsed.
    Malformed,

    /// The coordinates are not on this planet.
    OutOfRange,
}

impl Display for Ignored {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Ignored::SentenceType => "not an RMC sentence",
            Ignored::Checksum => "bad checksum",
            Ignored::NoFix => "no valid fix",
            Ignored::Malformed => "malformed",
            Ignored::OutOfRange => "out of range",
        };

        write!(f, "{reason}")
    }
}

/// The result of decoding a line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decoded {
    /// A valid position.
    Fix(LocationFix),

    /// Nothing usable.
    Ignored(Ignored),
}

impl Decoded {
    /// The fix, if any.
    pub fn fix(self) -> Option<LocationFix> {
        match self {
            Decoded::Fix(fix) => Some(fix),
            Decoded::Ignored(_) => None,
        }
    }
}

/// XOR of all bytes between `$` and `*`.
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0, |sum, byte| sum ^ byte)
}

/// Split off and verify a `*hh` suffix, if there is one.
fn strip_checksum(sentence: &str) -> Result<&str, Ignored> {
    let Some((body, given)) = sentence.rsplit_once('*') else {
        return Ok(sentence);
    };

    let given = u8::from_str_radix(given, 16).map_err(|_| Ignored::Checksum)?;
    let computed = checksum(body.strip_prefix('$').unwrap_or(body));

    if given == computed {
        Ok(body)
    } else {
        Err(Ignored::Checksum)
    }
}

fn is_rmc(sentence_type: &str) -> bool {
    sentence_type
        .strip_prefix('$')
        .map(|address| address.len() == 5 && address.ends_with("RMC"))
        .unwrap_or(false)
}

/// Turn `DDMM.MMMM` (or `DDDMM.MMMM`) and a hemisphere into signed decimal degrees.
fn to_decimal(raw: &str, hemisphere: &str, positive: &str, negative: &str) -> Result<f64, Ignored> {
    let raw: f64 = raw.parse().map_err(|_| Ignored::Malformed)?;

    if !raw.is_finite() || raw < 0.0 {
        return Err(Ignored::Malformed);
    }

    let degrees = (raw / 100.0).floor();
    let minutes = raw % 100.0;
    let decimal = degrees + minutes / 60.0;

    if hemisphere == positive {
        Ok(decimal)
    } else if hemisphere == negative {
        Ok(-decimal)
    } else {
        Err(Ignored::Malformed)
    }
}

fn decode_fields(line: &str) -> Result<LocationFix, Ignored> {
    let line = line.trim();

    // Receivers may put noise on the wire before the sentence starts.
    let line = line.find('$').map_or(line, |start| &line[start..]);

    let sentence = strip_checksum(line)?;
    let fields = sentence.split(',').collect::<Vec<_>>();

    if !is_rmc(fields[0]) {
        return Err(Ignored::SentenceType);
    }

    match fields.get(2) {
        Some(&"A") => {}
        Some(_) => return Err(Ignored::NoFix),
        None => return Err(Ignored::Malformed),
    }

    let Some(&[lat, lat_hemisphere, lng, lng_hemisphere]) = fields.get(3..7) else {
        return Err(Ignored::Malformed);
    };

    let lat = to_decimal(lat, lat_hemisphere, "N", "S")?;
    let lng = to_decimal(lng, lng_hemisphere, "E", "W")?;

    LocationFix::new(lat, lng).ok_or(Ignored::OutOfRange)
}

/// Decode a line from a GPS receiver.
pub fn decode(line: &str) -> Decoded {
    match decode_fields(line) {
        Ok(fix) => Decoded::Fix(fix),
        Err(ignored) => Decoded::Ignored(ignored),
    }
}
