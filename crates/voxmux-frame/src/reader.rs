use std::pin::Pin;

use futures_core::Stream;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::codec::{FrameConfig, Line, LineCodec};
use crate::error::{FrameError, Result};

/// Reads newline-terminated lines from any `AsyncRead` stream.
///
/// Handles partial reads internally: callers always get complete lines.
pub struct LineReader<T> {
    inner: FramedRead<T, LineCodec>,
    config: FrameConfig,
}

impl<T: AsyncRead + Unpin> LineReader<T> {
    /// Create a new line reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new line reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner: FramedRead::new(inner, LineCodec::with_max_length(config.max_line_length)),
            config,
        }
    }

    /// Read the next line.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub async fn read_line(&mut self) -> Result<Line> {
        let next = std::future::poll_fn(|cx| Pin::new(&mut self.inner).poll_next(cx)).await;
        match next {
            Some(line) => line,
            None => Err(FrameError::ConnectionClosed),
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        self.inner.get_ref()
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::io::AsyncWriteExt;

    use super::*;

    fn data(s: &str) -> Line {
        Line::Data(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[tokio::test]
    async fn read_multiple_lines() {
        let wire = b"one\ntwo\nthree\n".to_vec();
        let mut reader = LineReader::new(std::io::Cursor::new(wire));

        assert_eq!(reader.read_line().await.unwrap(), data("one"));
        assert_eq!(reader.read_line().await.unwrap(), data("two"));
        assert_eq!(reader.read_line().await.unwrap(), data("three"));
        assert!(matches!(
            reader.read_line().await.unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[tokio::test]
    async fn connection_closed_cleanly() {
        let mut reader = LineReader::new(std::io::Cursor::new(Vec::new()));
        let err = reader.read_line().await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn lines_split_across_writes() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = LineReader::new(rx);

        let writer = tokio::spawn(async move {
            for chunk in [&b"{\"sid\":"[..], b"\"s1\"}", b"\n{\"a\"", b":1}\n"] {
                tx.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        assert_eq!(reader.read_line().await.unwrap(), data(r#"{"sid":"s1"}"#));
        assert_eq!(reader.read_line().await.unwrap(), data(r#"{"a":1}"#));
        writer.await.unwrap();
        assert!(matches!(
            reader.read_line().await.unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[tokio::test]
    async fn oversized_line_does_not_end_stream() {
        let cfg = FrameConfig::default().with_max_line_length(8);
        let wire = b"this line is far too long\nok\n".to_vec();
        let mut reader = LineReader::with_config(std::io::Cursor::new(wire), cfg);

        assert_eq!(reader.read_line().await.unwrap(), Line::Oversized(25));
        assert_eq!(reader.read_line().await.unwrap(), data("ok"));
        assert_eq!(reader.config().max_line_length, 8);
    }

    #[tokio::test]
    async fn unterminated_final_line_is_delivered() {
        let mut reader = LineReader::new(std::io::Cursor::new(b"tail".to_vec()));
        assert_eq!(reader.read_line().await.unwrap(), data("tail"));
    }
}
