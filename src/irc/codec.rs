/// Line codec — frames the client TCP byte stream into protocol lines.
///
/// The decoder yields raw lines rather than parsed messages: the session loop
/// must tell an empty line (the client's disconnect signal) apart from a
/// decode failure (logged, the session keeps reading). Lines are split on
/// `\n` with an optional preceding `\r`; outgoing messages are always
/// CR-LF terminated.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::Message;

/// Maximum buffered bytes while waiting for a line terminator.
const MAX_LINE_LENGTH: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("line exceeds maximum length ({MAX_LINE_LENGTH} bytes)")]
    LineTooLong,
    /// The line was not valid UTF-8. The bytes have already been consumed,
    /// so the caller may continue decoding subsequent lines.
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Tokio codec: decodes client lines, encodes server [`Message`]s.
#[derive(Debug, Default)]
pub struct LineCodec;

impl Decoder for LineCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(nl_pos) = src.iter().position(|&b| b == b'\n') else {
            if src.len() > MAX_LINE_LENGTH {
                return Err(CodecError::LineTooLong);
            }
            return Ok(None);
        };

        let mut line_bytes = src.split_to(nl_pos);
        src.advance(1); // skip \n
        if line_bytes.last() == Some(&b'\r') {
            line_bytes.truncate(line_bytes.len() - 1);
        }

        match std::str::from_utf8(&line_bytes) {
            Ok(line) => Ok(Some(line.to_owned())),
            Err(_) => Err(CodecError::InvalidUtf8),
        }
    }
}

impl Encoder<Message> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let wire = item.to_wire();
        dst.reserve(wire.len() + 2);
        dst.put_slice(wire.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use pretty_assertions::assert_eq;

    #[test]
    fn decode_crlf_line() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from("NICK alice\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("NICK alice"));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_bare_lf_line() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from("PING\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("PING"));
    }

    #[test]
    fn decode_partial_then_complete() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from("NICK al");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"ice\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("NICK alice"));
    }

    #[test]
    fn decode_two_lines_in_one_read() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from("NICK alice\r\nUSER alice 0 * :Alice\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("NICK alice"));
        assert_eq!(
            codec.decode(&mut buf).unwrap().as_deref(),
            Some("USER alice 0 * :Alice")
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_empty_line_is_yielded() {
        // An empty line is a real item — the session treats it as disconnect.
        let mut codec = LineCodec;
        let mut buf = BytesMut::from("\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some(""));
    }

    #[test]
    fn decode_invalid_utf8_consumes_line() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from(&b"\xff\xfe\r\nPING\r\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf).unwrap_err(),
            CodecError::InvalidUtf8
        ));
        // The bad line is gone; the next decode succeeds.
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("PING"));
    }

    #[test]
    fn decode_rejects_oversized_buffer() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from(vec![b'A'; MAX_LINE_LENGTH + 1].as_slice());
        assert!(matches!(
            codec.decode(&mut buf).unwrap_err(),
            CodecError::LineTooLong
        ));
    }

    #[test]
    fn encode_appends_crlf() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::new();
        let msg = Message::with_prefix(
            "palaver.local",
            "001",
            vec!["alice".into(), "Welcome to palaver!".into()],
        );
        codec.encode(msg, &mut buf).unwrap();
        assert_eq!(&buf[..], b":palaver.local 001 alice :Welcome to palaver!\r\n");
    }
}
