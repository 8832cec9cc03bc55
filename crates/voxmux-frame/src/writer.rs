use std::io::ErrorKind;

use bytes::BytesMut;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::codec::{encode_line, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete lines to any `AsyncWrite` stream.
///
/// Each send waits until the line has been handed to the stream and flushed,
/// so a slow reader on the other end applies backpressure to the caller.
///
/// `send` is cancel safe with respect to framing: bytes of a line whose send
/// was dropped mid-write stay buffered and are written out before the next
/// line starts.
pub struct LineWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: AsyncWrite + Unpin> LineWriter<T> {
    /// Create a new line writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new line writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Frame and send one payload.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_line_length {
            return Err(FrameError::LineTooLong {
                size: payload.len(),
                max: self.config.max_line_length,
            });
        }

        self.finish_unfinished().await?;
        encode_line(payload, &mut self.buf)?;
        self.inner
            .write_all_buf(&mut self.buf)
            .await
            .map_err(map_write_error)?;
        self.flush().await
    }

    /// True while part of an interrupted line is still buffered.
    pub fn has_unfinished_line(&self) -> bool {
        !self.buf.is_empty()
    }

    async fn finish_unfinished(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        debug!(remaining = self.buf.len(), "completing interrupted line");
        self.inner
            .write_all_buf(&mut self.buf)
            .await
            .map_err(map_write_error)
    }

    /// Serialize `value` as compact JSON and send it as one line.
    pub async fn send_json<V: Serialize + ?Sized>(&mut self, value: &V) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.send(&payload).await
    }

    /// Flush the underlying stream.
    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await.map_err(map_write_error)
    }

    /// Close the write side, signalling EOF to the peer.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await.map_err(map_write_error)
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

fn map_write_error(err: std::io::Error) -> FrameError {
    match err.kind() {
        ErrorKind::BrokenPipe | ErrorKind::WriteZero | ErrorKind::ConnectionReset => {
            FrameError::ConnectionClosed
        }
        _ => FrameError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::codec::Line;
    use crate::packet::Request;
    use crate::reader::LineReader;

    #[tokio::test]
    async fn write_single_line() {
        let mut writer = LineWriter::new(Vec::new());
        writer.send(b"hello").await.unwrap();
        assert_eq!(writer.into_inner(), b"hello\n");
    }

    #[tokio::test]
    async fn write_request_json() {
        let mut writer = LineWriter::new(Vec::new());
        let request = Request::new(0, "s1", json!({"cmd": "join", "chat": 100})).unwrap();
        writer.send_json(&request).await.unwrap();

        let wire = writer.into_inner();
        assert_eq!(wire.last(), Some(&b'\n'));
        assert_eq!(wire.iter().filter(|b| **b == b'\n').count(), 1);
        let value: serde_json::Value = serde_json::from_slice(&wire).unwrap();
        assert_eq!(value, json!({"pid": 0, "sid": "s1", "chat": 100, "cmd": "join"}));
    }

    #[tokio::test]
    async fn oversized_payload_rejected() {
        let cfg = FrameConfig::default().with_max_line_length(4);
        let mut writer = LineWriter::with_config(Vec::new(), cfg);

        let err = writer.send(b"too long").await.unwrap_err();
        assert!(matches!(err, FrameError::LineTooLong { size: 8, max: 4 }));
        assert!(writer.get_ref().is_empty());
    }

    #[tokio::test]
    async fn slow_reader_applies_backpressure() {
        let (tx, mut rx) = tokio::io::duplex(16);
        let mut writer = LineWriter::new(tx);
        let payload = vec![b'x'; 256];

        let send = tokio::spawn(async move {
            writer.send(&payload).await.unwrap();
            writer
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!send.is_finished());

        let mut received = vec![0u8; 257];
        rx.read_exact(&mut received).await.unwrap();
        send.await.unwrap();
        assert_eq!(received.last(), Some(&b'\n'));
    }

    #[tokio::test]
    async fn cancelled_send_does_not_corrupt_the_next_line() {
        let (tx, rx) = tokio::io::duplex(64);
        let mut writer = LineWriter::new(tx);
        let large = vec![b'x'; 1000];

        let interrupted =
            tokio::time::timeout(Duration::from_millis(50), writer.send(&large)).await;
        assert!(interrupted.is_err());
        assert!(writer.has_unfinished_line());

        let reader = tokio::spawn(async move {
            let mut reader = LineReader::new(rx);
            let mut lines = Vec::new();
            for _ in 0..2 {
                let Line::Data(line) = reader.read_line().await.unwrap() else {
                    panic!("expected data line");
                };
                lines.push(line);
            }
            lines
        });
        writer.send(br#"{"cmd":"pause"}"#).await.unwrap();
        assert!(!writer.has_unfinished_line());

        let lines = reader.await.unwrap();
        assert_eq!(&lines[0][..], &large[..]);
        assert_eq!(&lines[1][..], br#"{"cmd":"pause"}"#);
    }

    #[tokio::test]
    async fn closed_peer_reports_connection_closed() {
        let (tx, rx) = tokio::io::duplex(64);
        drop(rx);

        let mut writer = LineWriter::new(tx);
        let err = writer.send(b"late").await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn writer_and_reader_over_duplex() {
        let (tx, rx) = tokio::io::duplex(1024);
        let mut writer = LineWriter::new(tx);
        let mut reader = LineReader::new(rx);

        writer.send(br#"{"a":1}"#).await.unwrap();
        writer.send(br#"{"b":2}"#).await.unwrap();
        writer.shutdown().await.unwrap();

        let Line::Data(first) = reader.read_line().await.unwrap() else {
            panic!("expected data line");
        };
        assert_eq!(&first[..], br#"{"a":1}"#);
        let Line::Data(second) = reader.read_line().await.unwrap() else {
            panic!("expected data line");
        };
        assert_eq!(&second[..], br#"{"b":2}"#);
        assert!(matches!(
            reader.read_line().await.unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }
}
