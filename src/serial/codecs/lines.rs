use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::serial::{error::PortError, SerialMessageBytes};

/// This codec has a configurable delimiter character for reading.
/// Writes are put on the wire as they are, devices get exactly what callers give.
#[derive(Debug, Clone)]
pub struct LinesCodec {
    /// How far we have looked for a newline into the buffer
    cursor: usize,

    /// How to delimit incoming byte streams.
    /// This delimiter is not included in the yielded frames.
    read_delimiter: u8,
}

impl LinesCodec {
    /// Create a new codec.
    pub fn new(read_delimiter: u8) -> Self {
        Self {
            cursor: 0,
            read_delimiter,
        }
    }
}

impl Default for LinesCodec {
    fn default() -> Self {
        Self::new(b'\n')
    }
}

impl Decoder for LinesCodec {
    type Item = SerialMessageBytes;
    type Error = PortError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let read_to = src.len();

        let look_at = &src[self.cursor..read_to];

        if let Some(position) = look_at.iter().position(|&byte| byte == self.read_delimiter) {
            // Since we might "start late" in the buffer (from the cursor),
            // the "global" position within the buffer has to be calculated.
            let actual_position = self.cursor + position;

            // Next time we need to start over.
            self.cursor = 0;

            // Split at the delimiter, getting a slice of the bytes before it.
            let line = src.split_to(actual_position);

            // Discard the delimiter by advancing the source buffer beyond it.
            src.advance(1);

            Ok(Some(line[..].to_vec()))
        } else {
            // We did not find a full frame.
            // The next time we are called the same buffer `src` will be provided to us (same starting point),
            // but possibly with more data.
            // Since our job is to find the delimiter, we don't need to re-read the bytes we have already looked at.
            self.cursor = read_to;

            Ok(None)
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None if src.is_empty() => Ok(None),
            None => {
                // A partial line at the end of the stream is still a line.
                self.cursor = 0;
                let rest = src.split_to(src.len());

                Ok(Some(rest[..].to_vec()))
            }
        }
    }
}

impl Encoder<SerialMessageBytes> for LinesCodec {
    type Error = PortError;

    fn encode(&mut self, item: SerialMessageBytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn frames_are_split_on_newline() {
        let mut codec = LinesCodec::default();
        let mut buffer = BytesMut::from(&b"OK\r\n$GPGGA,1\r\n"[..]);

        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(b"OK\r".to_vec()));
        assert_eq!(
            codec.decode(&mut buffer).unwrap(),
            Some(b"$GPGGA,1\r".to_vec())
        );
        assert_eq!(codec.decode(&mut buffer).unwrap(), None);
    }

    #[test]
    fn partial_frame_waits_for_more() {
        let mut codec = LinesCodec::default();
        let mut buffer = BytesMut::from(&b"$GPR"[..]);

        assert_eq!(codec.decode(&mut buffer).unwrap(), None);

        buffer.extend_from_slice(b"MC,1\n");
        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(b"$GPRMC,1".to_vec()));
    }

    #[test]
    fn partial_frame_at_eof_is_yielded() {
        let mut codec = LinesCodec::default();
        let mut buffer = BytesMut::from(&b"OK"[..]);

        assert_eq!(codec.decode_eof(&mut buffer).unwrap(), Some(b"OK".to_vec()));
        assert_eq!(codec.decode_eof(&mut buffer).unwrap(), None);
    }

    #[test]
    fn other_read_delimiter() {
        let mut codec = LinesCodec::new(b'\r');
        let mut buffer = BytesMut::from(&b"OK\rAT"[..]);

        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(b"OK".to_vec()));
        assert_eq!(codec.decode(&mut buffer).unwrap(), None);
    }

    #[test]
    fn writes_are_forwarded_as_is() {
        let mut codec = LinesCodec::default();
        let mut buffer = BytesMut::new();

        codec.encode(b"AT+CH1=1".to_vec(), &mut buffer).unwrap();
        assert_eq!(&buffer[..], b"AT+CH1=1");
    }
}
