use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::{FrameError, Result};

/// Line terminator.
pub const DELIMITER: u8 = b'\n';

/// Default maximum line length (excluding the terminator): 1 MiB.
pub const DEFAULT_MAX_LINE: usize = 1024 * 1024;

/// Configuration for line framing.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum line length in bytes. Default: 1 MiB.
    pub max_line_length: usize,
}

impl FrameConfig {
    /// Override the maximum line length.
    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE,
        }
    }
}

/// One unit produced by [`LineCodec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A complete line without its terminator.
    Data(Bytes),
    /// A line that exceeded the limit and was skipped; carries its length.
    Oversized(usize),
}

/// Append `payload` followed by `\n` to `dst`.
///
/// Wire format:
/// ```text
/// {"pid":0,"sid":"s1","cmd":"join"}\n
/// ```
pub fn encode_line(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.contains(&DELIMITER) {
        return Err(FrameError::EmbeddedDelimiter);
    }
    dst.reserve(payload.len() + 1);
    dst.put_slice(payload);
    dst.put_u8(DELIMITER);
    Ok(())
}

/// Decode one line from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a full line yet.
/// On success, consumes the line and its terminator. A trailing `\r` is
/// stripped.
pub fn decode_line(src: &mut BytesMut, max_line: usize) -> Result<Option<Bytes>> {
    match find_delimiter(src) {
        Some(idx) if idx > max_line => Err(FrameError::LineTooLong {
            size: idx,
            max: max_line,
        }),
        Some(idx) => Ok(Some(take_line(src, idx))),
        None if src.len() > max_line => Err(FrameError::LineTooLong {
            size: src.len(),
            max: max_line,
        }),
        None => Ok(None),
    }
}

/// Streaming newline decoder for `tokio_util::codec::FramedRead`.
///
/// Unlike a plain lines codec, an oversized line is not a stream error: its
/// bytes are skipped up to the next terminator and reported as
/// [`Line::Oversized`], after which decoding resumes normally.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_line_length: usize,
    next_index: usize,
    discarding: Option<usize>,
}

impl LineCodec {
    /// Codec with the default limit.
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE)
    }

    /// Codec that skips lines longer than `max_line_length`.
    pub fn with_max_length(max_line_length: usize) -> Self {
        Self {
            max_line_length,
            next_index: 0,
            discarding: None,
        }
    }

    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = Line;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Line>> {
        loop {
            if let Some(skipped) = self.discarding {
                return match find_delimiter(src) {
                    Some(idx) => {
                        src.advance(idx + 1);
                        self.discarding = None;
                        Ok(Some(Line::Oversized(skipped + idx)))
                    }
                    None => {
                        let len = src.len();
                        src.advance(len);
                        self.discarding = Some(skipped + len);
                        Ok(None)
                    }
                };
            }

            // Only scan bytes not seen by a previous call.
            let limit = src.len().min(self.max_line_length.saturating_add(1));
            let start = self.next_index.min(limit);
            match find_delimiter(&src[start..limit]) {
                Some(offset) => {
                    self.next_index = 0;
                    return Ok(Some(Line::Data(take_line(src, start + offset))));
                }
                None if src.len() > self.max_line_length => {
                    self.next_index = 0;
                    self.discarding = Some(0);
                }
                None => {
                    self.next_index = limit;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Line>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if let Some(skipped) = self.discarding.take() {
            return Ok(Some(Line::Oversized(skipped)));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // Unterminated final line.
        let len = src.len();
        let mut line = src.split_to(len);
        strip_cr(&mut line);
        Ok(Some(Line::Data(line.freeze())))
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|b| *b == DELIMITER)
}

fn take_line(src: &mut BytesMut, idx: usize) -> Bytes {
    let mut line = src.split_to(idx + 1);
    line.truncate(idx);
    strip_cr(&mut line);
    line.freeze()
}

fn strip_cr(line: &mut BytesMut) {
    if line.last() == Some(&b'\r') {
        line.truncate(line.len() - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(s: &str) -> Option<Line> {
        Some(Line::Data(Bytes::copy_from_slice(s.as_bytes())))
    }

    #[test]
    fn encode_appends_terminator() {
        let mut buf = BytesMut::new();
        encode_line(br#"{"pid":0}"#, &mut buf).unwrap();
        assert_eq!(&buf[..], b"{\"pid\":0}\n");
    }

    #[test]
    fn encode_rejects_embedded_newline() {
        let mut buf = BytesMut::new();
        let err = encode_line(b"a\nb", &mut buf).unwrap_err();
        assert!(matches!(err, FrameError::EmbeddedDelimiter));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_line_waits_for_terminator() {
        let mut buf = BytesMut::from(&b"{\"sid\""[..]);
        assert!(decode_line(&mut buf, DEFAULT_MAX_LINE).unwrap().is_none());

        buf.extend_from_slice(b":\"s1\"}\r\nrest");
        let line = decode_line(&mut buf, DEFAULT_MAX_LINE).unwrap().unwrap();
        assert_eq!(&line[..], b"{\"sid\":\"s1\"}");
        assert_eq!(&buf[..], b"rest");
    }

    #[test]
    fn decode_line_rejects_oversized() {
        let mut buf = BytesMut::from(&b"0123456789\n"[..]);
        let err = decode_line(&mut buf, 4).unwrap_err();
        assert!(matches!(err, FrameError::LineTooLong { size: 10, max: 4 }));
    }

    #[test]
    fn codec_splits_multiple_lines() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"one\ntwo\n\nthree"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), data("one"));
        assert_eq!(codec.decode(&mut buf).unwrap(), data("two"));
        assert_eq!(codec.decode(&mut buf).unwrap(), data(""));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), data("three"));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn codec_resumes_scan_across_chunks() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        for chunk in [&b"ab"[..], b"cd", b"e\nf"] {
            buf.extend_from_slice(chunk);
            if let Some(line) = codec.decode(&mut buf).unwrap() {
                assert_eq!(Some(line), data("abcde"));
            }
        }
        assert_eq!(&buf[..], b"f");
    }

    #[test]
    fn codec_skips_oversized_line_and_resyncs() {
        let mut codec = LineCodec::with_max_length(8);
        let mut buf = BytesMut::from(&b"0123456789abcdef"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());

        buf.extend_from_slice(b"ghij\n{\"ok\":1}\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Line::Oversized(20)));
        assert_eq!(codec.decode(&mut buf).unwrap(), data("{\"ok\":1}"));
    }

    #[test]
    fn codec_accepts_line_at_exact_limit() {
        let mut codec = LineCodec::with_max_length(4);
        let mut buf = BytesMut::from(&b"abcd\nabcde\nok\n"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), data("abcd"));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Line::Oversized(5)));
        assert_eq!(codec.decode(&mut buf).unwrap(), data("ok"));
    }

    #[test]
    fn codec_reports_oversized_tail_at_eof() {
        let mut codec = LineCodec::with_max_length(2);
        let mut buf = BytesMut::from(&b"abcdef"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(Line::Oversized(6)));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }
}
