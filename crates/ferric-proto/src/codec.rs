//! Line framing codec.
//!
//! Frames CRLF (or bare LF) terminated lines off a byte stream, enforcing
//! the 512-byte protocol cap. Lines longer than the cap are an error; the
//! daemon exits such links rather than silently truncating inbound data.
//! Outbound strings are written as-is (the formatter already appended CRLF
//! and truncated).

use crate::error::ParseError;
use crate::line::MAX_LINE_LEN;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Tokio codec for IRC wire lines.
#[derive(Debug, Default)]
pub struct LineCodec {
    scan_from: usize,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        let nl = memchr::memchr(b'\n', &src[self.scan_from..]).map(|p| p + self.scan_from);

        match nl {
            Some(pos) => {
                self.scan_from = 0;
                let mut frame = src.split_to(pos + 1);
                // drop the LF and an optional preceding CR
                frame.truncate(pos);
                if frame.last() == Some(&b'\r') {
                    frame.truncate(frame.len() - 1);
                }
                if frame.len() > MAX_LINE_LEN - 2 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        ParseError::LineTooLong(frame.len()),
                    ));
                }
                match std::str::from_utf8(&frame) {
                    Ok(s) => Ok(Some(s.to_string())),
                    Err(_) => Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        ParseError::InvalidUtf8,
                    )),
                }
            }
            None => {
                if src.len() > MAX_LINE_LEN {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        ParseError::LineTooLong(src.len()),
                    ));
                }
                self.scan_from = src.len();
                Ok(None)
            }
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.put(item.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_crlf_and_lf() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"PING :x\r\nNICK a\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("PING :x".into()));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("NICK a".into()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_decode_partial_then_complete() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"PRIV"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"MSG #c :hi\r\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some("PRIVMSG #c :hi".into())
        );
    }

    #[test]
    fn test_decode_rejects_overlong() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&vec![b'a'; 600]);
        buf.extend_from_slice(b"\r\n");
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_decode_rejects_overlong_without_newline() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&vec![b'a'; 513]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_encode_passthrough() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("PONG :x\r\n".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"PONG :x\r\n");
    }
}
