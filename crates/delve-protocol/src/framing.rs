//! Newline-delimited framing for TCP streams.
//!
//! Every message on the wire is one line:
//!
//! ```text
//! +-----------------------------+------+
//! |   payload (compact JSON)    | '\n' |
//! +-----------------------------+------+
//! ```
//!
//! Encoded envelopes never contain a raw newline, so `\n` is an unambiguous
//! delimiter. Blank lines are skipped on read and a trailing `\r` is
//! tolerated so hand-typed `nc` sessions work.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum allowed payload size in bytes, excluding the delimiter.
    /// Default: 64 KiB.
    pub max_payload_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 65_536,
        }
    }
}

/// Errors that can occur during framing operations.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload size exceeds the configured maximum.
    #[error("payload size exceeds maximum {max}")]
    PayloadTooLarge {
        /// The configured maximum.
        max: u32,
    },

    /// The payload to write contains the frame delimiter.
    #[error("payload contains an embedded newline")]
    EmbeddedNewline,

    /// The connection was closed before a complete frame was received.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read a single frame from the stream, returning the payload without its
/// delimiter.
///
/// Returns [`FrameError::ConnectionClosed`] on EOF, including EOF in the
/// middle of a line. After [`FrameError::PayloadTooLarge`] the stream is no
/// longer aligned on a frame boundary and should be dropped.
pub async fn read_frame<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Vec<u8>, FrameError> {
    let max = config.max_payload_size as usize;
    // Room for the payload, an optional '\r' and the delimiter.
    let read_limit = (max + 2) as u64;

    loop {
        let mut line = Vec::new();
        let n = (&mut *reader)
            .take(read_limit)
            .read_until(b'\n', &mut line)
            .await?;

        if n == 0 {
            return Err(FrameError::ConnectionClosed);
        }

        if line.last() != Some(&b'\n') {
            if line.len() > max {
                return Err(FrameError::PayloadTooLarge {
                    max: config.max_payload_size,
                });
            }
            return Err(FrameError::ConnectionClosed);
        }

        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if line.len() > max {
            return Err(FrameError::PayloadTooLarge {
                max: config.max_payload_size,
            });
        }
        if !line.is_empty() {
            return Ok(line);
        }
    }
}

/// Write a single frame: the payload followed by `\n`, then flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    if payload.len() > config.max_payload_size as usize {
        return Err(FrameError::PayloadTooLarge {
            max: config.max_payload_size,
        });
    }
    if payload.contains(&b'\n') {
        return Err(FrameError::EmbeddedNewline);
    }

    writer.write_all(payload).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{BufReader, duplex};

    fn small_config() -> FrameConfig {
        FrameConfig {
            max_payload_size: 16,
        }
    }

    #[tokio::test]
    async fn test_single_message_roundtrip() {
        let (mut client, server) = duplex(1024);
        let mut server = BufReader::new(server);
        let config = FrameConfig::default();

        write_frame(&mut client, br#"{"type":"init"}"#, &config)
            .await
            .unwrap();
        let received = read_frame(&mut server, &config).await.unwrap();
        assert_eq!(received, br#"{"type":"init"}"#);
    }

    #[tokio::test]
    async fn test_messages_arrive_in_order() {
        let (mut client, server) = duplex(1024);
        let mut server = BufReader::new(server);
        let config = FrameConfig::default();

        for i in 0..5u8 {
            write_frame(&mut client, &[b'a' + i], &config).await.unwrap();
        }
        for i in 0..5u8 {
            assert_eq!(read_frame(&mut server, &config).await.unwrap(), vec![b'a' + i]);
        }
    }

    #[tokio::test]
    async fn test_blank_lines_and_crlf_are_tolerated() {
        let (mut client, server) = duplex(1024);
        let mut server = BufReader::new(server);
        let config = FrameConfig::default();

        client.write_all(b"\n\r\nabc\r\n").await.unwrap();
        assert_eq!(read_frame(&mut server, &config).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_eof_is_connection_closed() {
        let (client, server) = duplex(64);
        let mut server = BufReader::new(server);
        drop(client);
        let result = read_frame(&mut server, &FrameConfig::default()).await;
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_partial_frame_then_eof() {
        let (mut client, server) = duplex(64);
        let mut server = BufReader::new(server);
        client.write_all(b"half a frame").await.unwrap();
        drop(client);
        let result = read_frame(&mut server, &FrameConfig::default()).await;
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_oversized_read_rejected() {
        let (mut client, server) = duplex(1024);
        let mut server = BufReader::new(server);
        client.write_all(&[b'x'; 64]).await.unwrap();
        client.write_all(b"\n").await.unwrap();
        let result = read_frame(&mut server, &small_config()).await;
        assert!(matches!(
            result,
            Err(FrameError::PayloadTooLarge { max: 16 })
        ));
    }

    #[tokio::test]
    async fn test_payload_at_limit_accepted() {
        let (mut client, server) = duplex(1024);
        let mut server = BufReader::new(server);
        let config = small_config();
        write_frame(&mut client, &[b'y'; 16], &config).await.unwrap();
        assert_eq!(read_frame(&mut server, &config).await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_oversized_write_rejected() {
        let (mut client, _server) = duplex(1024);
        let result = write_frame(&mut client, &[0u8; 17], &small_config()).await;
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_embedded_newline_rejected() {
        let (mut client, _server) = duplex(1024);
        let result = write_frame(&mut client, b"a\nb", &FrameConfig::default()).await;
        assert!(matches!(result, Err(FrameError::EmbeddedNewline)));
    }
}
