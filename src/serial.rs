/// Serial port related errors.
pub mod error;

/// The serial port driver task.
pub(crate) mod serial_port;

/// Codecs for encoding/decoding messages to/from wire.
pub(crate) mod codecs;

/// The message data type used for serial bytes.
pub type SerialMessageBytes = Vec<u8>;

/// Turn bytes read from wire into a line, ignoring any bad utf8 bytes.
///
/// A trailing carriage return (as in `\r\n` terminated lines) is removed.
pub(crate) fn line_lossy<B: AsRef<[u8]>>(bytes: B) -> String {
    let line = String::from_utf8_lossy(bytes.as_ref());

    line.strip_suffix('\r').unwrap_or(&line).to_string()
}
