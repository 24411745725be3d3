//! Balanced-brace JSON framing.
//!
//! TCP delivers a byte stream with no message boundaries: one read may carry
//! half a message, or three. The framer accumulates bytes and cuts out one
//! top-level JSON object at a time by counting braces outside of string
//! literals.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

use crate::MAX_MESSAGE_SIZE;
use crate::error::FramingError;

/// Scanner state carried between chunks so bytes are only inspected once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ScanState {
    /// Next byte to inspect, relative to the start of the buffer.
    pos: usize,
    /// Current `{`/`}` nesting depth outside of strings.
    depth: usize,
    /// Whether the scanner sits inside a quoted string.
    in_string: bool,
    /// Whether the previous byte inside a string was an unescaped backslash.
    escaped: bool,
    /// Whether an opening brace has been seen.
    started: bool,
    /// Whether the object being scanned outgrew the frame limit. Its bytes
    /// are dropped as they are scanned until it closes.
    discarding: bool,
}

impl ScanState {
    /// Advance over `buf` from `self.pos`. Returns the exclusive end index of the
    /// first complete top-level object, or `None` if the buffer ends first.
    fn advance(&mut self, buf: &[u8]) -> Option<usize> {
        while self.pos < buf.len() {
            let byte = buf[self.pos];
            self.pos += 1;

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' => {
                    self.depth += 1;
                    self.started = true;
                }
                b'}' if self.depth > 0 => {
                    self.depth -= 1;
                    if self.depth == 0 && self.started {
                        return Some(self.pos);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

/// Returns the exclusive end offset of the first balanced top-level JSON object
/// in `buf`, or `None` when no complete object is present yet.
///
/// Braces inside string literals (including escaped quotes) are ignored.
///
/// ```rust
/// use uibridge_protocol::find_message_end;
///
/// assert_eq!(find_message_end(br#"{"a":"}"}{"#), Some(9));
/// assert_eq!(find_message_end(br#"{"a":{"b":1}"#), None);
/// ```
pub fn find_message_end(buf: &[u8]) -> Option<usize> {
    ScanState::default().advance(buf)
}

/// Accumulating framer over an append-only byte buffer.
#[derive(Debug)]
pub struct JsonFramer {
    buffer: BytesMut,
    scan: ScanState,
    max_frame_size: usize,
}

impl Default for JsonFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonFramer {
    /// Create a framer with the default frame limit.
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_MESSAGE_SIZE)
    }

    /// Create a framer that rejects messages larger than `max_frame_size` bytes.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scan: ScanState::default(),
            max_frame_size,
        }
    }

    /// Append a chunk read from the stream.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Number of buffered bytes not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Extract the next complete message from the buffered bytes.
    ///
    /// Returns `Ok(None)` when more data is needed. Errors are recoverable:
    /// the offending bytes are dropped and the framer can be polled again.
    /// An object that outgrows the frame limit is reported once, then the
    /// rest of it is skipped as it arrives, nested objects included.
    pub fn next_frame(&mut self) -> Result<Option<String>, FramingError> {
        Self::decode_frame(&mut self.buffer, &mut self.scan, self.max_frame_size)
    }

    fn decode_frame(
        buffer: &mut BytesMut,
        scan: &mut ScanState,
        max_frame_size: usize,
    ) -> Result<Option<String>, FramingError> {
        if scan.discarding {
            match scan.advance(buffer) {
                Some(end) => {
                    buffer.advance(end);
                    *scan = ScanState::default();
                    trace!("Skipped the end of an oversized frame");
                }
                None => {
                    buffer.clear();
                    scan.pos = 0;
                    return Ok(None);
                }
            }
        }

        if !scan.started && scan.pos == 0 {
            let skip = buffer
                .iter()
                .take_while(|b| b.is_ascii_whitespace())
                .count();
            buffer.advance(skip);

            match buffer.first() {
                None => return Ok(None),
                Some(b'{') => {}
                Some(&byte) => {
                    let discarded = buffer
                        .iter()
                        .position(|b| *b == b'{')
                        .unwrap_or(buffer.len());
                    buffer.advance(discarded);
                    return Err(FramingError::UnexpectedByte { byte, discarded });
                }
            }
        }

        let Some(end) = scan.advance(buffer) else {
            if buffer.len() > max_frame_size {
                let size = buffer.len();
                buffer.clear();
                scan.pos = 0;
                scan.discarding = true;
                return Err(FramingError::FrameTooLarge {
                    size,
                    max: max_frame_size,
                });
            }
            return Ok(None);
        };

        let frame = buffer.split_to(end);
        *scan = ScanState::default();

        if frame.len() > max_frame_size {
            return Err(FramingError::FrameTooLarge {
                size: frame.len(),
                max: max_frame_size,
            });
        }

        String::from_utf8(frame.to_vec())
            .map(Some)
            .map_err(|e| FramingError::InvalidUtf8(e.to_string()))
    }
}

/// [`tokio_util::codec`] adapter around the balanced-brace scan, for use with
/// `Framed<TcpStream, JsonObjectCodec>`.
///
/// Garbage between messages, oversized objects and invalid UTF-8 frames are
/// logged and skipped so a single bad write does not tear down the connection.
#[derive(Debug, Clone)]
pub struct JsonObjectCodec {
    scan: ScanState,
    max_frame_size: usize,
}

impl Default for JsonObjectCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonObjectCodec {
    /// Create a codec with the default frame limit.
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_MESSAGE_SIZE)
    }

    /// Create a codec with a custom frame limit.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            scan: ScanState::default(),
            max_frame_size,
        }
    }

    /// The configured frame limit in bytes.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Decoder for JsonObjectCodec {
    type Item = String;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match JsonFramer::decode_frame(src, &mut self.scan, self.max_frame_size) {
                Ok(Some(frame)) => {
                    trace!(len = frame.len(), "framed message");
                    return Ok(Some(frame));
                }
                Ok(None) => return Ok(None),
                Err(e) => warn!("Dropping unframeable input: {}", e),
            }
        }
    }
}

impl Encoder<String> for JsonObjectCodec {
    type Error = FramingError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_frame_size {
            return Err(FramingError::FrameTooLarge {
                size: item.len(),
                max: self.max_frame_size,
            });
        }
        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_message_end_simple() {
        assert_eq!(find_message_end(b"{}"), Some(2));
        assert_eq!(find_message_end(br#"{"a":1}"#), Some(7));
    }

    #[test]
    fn test_find_message_end_incomplete() {
        assert_eq!(find_message_end(b""), None);
        assert_eq!(find_message_end(b"{"), None);
        assert_eq!(find_message_end(br#"{"a":{"b":2}"#), None);
    }

    #[test]
    fn test_braces_inside_strings_are_ignored() {
        let msg = br#"{"text":"}{ not a brace {{"}"#;
        assert_eq!(find_message_end(msg), Some(msg.len()));
    }

    #[test]
    fn test_escaped_quotes_do_not_end_strings() {
        let msg = br#"{"text":"say \"}\" twice"}"#;
        assert_eq!(find_message_end(msg), Some(msg.len()));

        // An escaped backslash right before the closing quote does end the string.
        let msg = br#"{"path":"C:\\"}"#;
        assert_eq!(find_message_end(msg), Some(msg.len()));
    }

    #[test]
    fn test_two_messages_in_one_chunk() {
        let mut framer = JsonFramer::new();
        framer.push(br#"{"id":"1"}{"id":"2"}"#);

        assert_eq!(framer.next_frame().unwrap().as_deref(), Some(r#"{"id":"1"}"#));
        assert_eq!(framer.next_frame().unwrap().as_deref(), Some(r#"{"id":"2"}"#));
        assert_eq!(framer.next_frame().unwrap(), None);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_message_split_across_chunks() {
        let mut framer = JsonFramer::new();
        framer.push(br#"{"id":"1","payload":{"te"#);
        assert_eq!(framer.next_frame().unwrap(), None);

        framer.push(br#"xt":"a \"quoted\" }"}}"#);
        assert_eq!(
            framer.next_frame().unwrap().as_deref(),
            Some(r#"{"id":"1","payload":{"text":"a \"quoted\" }"}}"#)
        );
        assert_eq!(framer.next_frame().unwrap(), None);
    }

    #[test]
    fn test_split_inside_escape_sequence() {
        let mut framer = JsonFramer::new();
        framer.push(br#"{"a":"x\"#);
        assert_eq!(framer.next_frame().unwrap(), None);
        framer.push(br#""}"}"#);
        assert_eq!(framer.next_frame().unwrap().as_deref(), Some(r#"{"a":"x\"}"}"#));
    }

    #[test]
    fn test_whitespace_between_messages_is_skipped() {
        let mut framer = JsonFramer::new();
        framer.push(b"  {\"a\":1}\n\r\n{\"b\":2}\n");

        assert_eq!(framer.next_frame().unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(framer.next_frame().unwrap().as_deref(), Some("{\"b\":2}"));
        assert_eq!(framer.next_frame().unwrap(), None);
    }

    #[test]
    fn test_leading_garbage_is_dropped() {
        let mut framer = JsonFramer::new();
        framer.push(br#"xyz{"a":1}"#);

        let err = framer.next_frame().unwrap_err();
        assert!(matches!(
            err,
            FramingError::UnexpectedByte {
                byte: b'x',
                discarded: 3
            }
        ));
        assert_eq!(framer.next_frame().unwrap().as_deref(), Some(r#"{"a":1}"#));
    }

    #[test]
    fn test_frame_too_large_clears_buffer() {
        let mut framer = JsonFramer::with_max_frame_size(8);
        framer.push(br#"{"aaaaaaaaaa""#);

        let err = framer.next_frame().unwrap_err();
        assert!(matches!(err, FramingError::FrameTooLarge { max: 8, .. }));
        assert_eq!(framer.buffered(), 0);

        framer.push(b"}{}");
        assert_eq!(framer.next_frame().unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn test_oversized_frame_is_skipped_until_it_closes() {
        let mut framer = JsonFramer::with_max_frame_size(16);
        framer.push(br#"{"id":"1","payload":{"x":"aaaaaaaa"#);

        let err = framer.next_frame().unwrap_err();
        assert!(matches!(err, FramingError::FrameTooLarge { max: 16, .. }));
        assert_eq!(framer.next_frame().unwrap(), None);

        // Nested objects and braces in strings belong to the dropped message.
        framer.push(br#"aaaa}{","inner":{"id":"nested"}}"#);
        assert_eq!(framer.next_frame().unwrap(), None);
        assert_eq!(framer.buffered(), 0);

        framer.push(br#"}{"id":"2"}"#);
        assert_eq!(framer.next_frame().unwrap().as_deref(), Some(r#"{"id":"2"}"#));
        assert_eq!(framer.next_frame().unwrap(), None);
    }

    #[test]
    fn test_codec_survives_oversized_frame() {
        let mut codec = JsonObjectCodec::with_max_frame_size(16);
        let mut buf = BytesMut::from(&br#"{"id":"1","payload":{"x":"aaaaaaaa"#[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(br#"aaaa","inner":{"id":"nested"}}}{"id":"2"}"#);
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some(r#"{"id":"2"}"#));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_codec_skips_garbage_and_keeps_state() {
        let mut codec = JsonObjectCodec::new();
        let mut buf = BytesMut::from(&br#"]]{"a":"#[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(br#"1}{"b":2}"#);
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some(r#"{"b":2}"#));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_codec_encode_respects_limit() {
        let mut codec = JsonObjectCodec::with_max_frame_size(4);
        let mut dst = BytesMut::new();
        assert!(codec.encode("{}".to_string(), &mut dst).is_ok());
        assert_eq!(&dst[..], b"{}");
        assert!(codec.encode(r#"{"a":1}"#.to_string(), &mut dst).is_err());
    }
}
