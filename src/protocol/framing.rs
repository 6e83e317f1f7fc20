//! Message framing for the request/response exchange.
//!
//! A message is one JSON document, optionally followed by a newline. The reader
//! accumulates chunks until the buffered bytes hold a complete document, turn out not
//! to be JSON at all, or the peer half-closes. This keeps peers that send a bare
//! document and then wait for the reply working, without the truncation a single
//! fixed-size read would cause.

use serde::de::IgnoredAny;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

const READ_CHUNK: usize = 8 * 1024;

/// Below this size the buffer is re-parsed after every chunk.
const EAGER_PARSE_LIMIT: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("message exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read one message. `Ok(None)` means the peer closed before sending anything.
pub async fn read_message<R>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            trace!(bytes = buf.len(), "peer closed write side");
            return Ok(if buf.is_empty() { None } else { Some(buf) });
        }

        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > max_len {
            return Err(FrameError::TooLarge { limit: max_len });
        }

        if should_probe(&buf) {
            if let Some(end) = message_end(&buf) {
                trace!(bytes = end, "message complete");
                buf.truncate(end);
                return Ok(Some(buf));
            }
        }
    }
}

/// Write one message followed by a newline, in a single write.
pub async fn write_message<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.extend_from_slice(payload);
    frame.push(b'\n');
    writer.write_all(&frame).await?;
    writer.flush().await
}

fn should_probe(buf: &[u8]) -> bool {
    if buf.len() <= EAGER_PARSE_LIMIT {
        return true;
    }
    matches!(
        buf.iter().rev().find(|b| !b.is_ascii_whitespace()),
        Some(b'}') | Some(b']')
    )
}

/// Length of the first message once the buffer holds a whole JSON value, or all of
/// it once the bytes can never become one. Anything after the first value is dropped.
fn message_end(buf: &[u8]) -> Option<usize> {
    let mut stream = serde_json::Deserializer::from_slice(buf).into_iter::<IgnoredAny>();
    match stream.next() {
        Some(Ok(_)) => Some(stream.byte_offset()),
        Some(Err(err)) if !err.is_eof() => Some(buf.len()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn reads_document_without_waiting_for_close() {
        let (mut client, mut server) = duplex(1024);
        client.write_all(br#"{"commands":[]}"#).await.unwrap();

        let message = read_message(&mut server, 1024).await.unwrap();
        assert_eq!(message.as_deref(), Some(&br#"{"commands":[]}"#[..]));
        drop(client);
    }

    #[tokio::test]
    async fn assembles_document_split_across_writes() {
        let (mut client, mut server) = duplex(1024);
        let reader = tokio::spawn(async move { read_message(&mut server, 1024).await });

        client.write_all(br#"{"commands":[{"id":"1","#).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        client.write_all(br#""method":"ls"}]}"#).await.unwrap();

        let message = reader.await.unwrap().unwrap().unwrap();
        assert_eq!(message, br#"{"commands":[{"id":"1","method":"ls"}]}"#.to_vec());
    }

    #[tokio::test]
    async fn garbage_is_returned_immediately() {
        let (mut client, mut server) = duplex(1024);
        client.write_all(b"not json").await.unwrap();

        let message = read_message(&mut server, 1024).await.unwrap();
        assert_eq!(message.as_deref(), Some(&b"not json"[..]));
        drop(client);
    }

    #[tokio::test]
    async fn only_the_first_document_is_kept() {
        let (mut client, mut server) = duplex(1024);
        client.write_all(b"{\"a\":1}\n{\"b\":2}\n").await.unwrap();

        let message = read_message(&mut server, 1024).await.unwrap();
        assert_eq!(message.as_deref(), Some(&b"{\"a\":1}"[..]));
        drop(client);
    }

    #[tokio::test]
    async fn close_without_data_yields_none() {
        let (client, mut server) = duplex(64);
        drop(client);
        assert!(read_message(&mut server, 64).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn partial_document_is_returned_on_close() {
        let (mut client, mut server) = duplex(64);
        client.write_all(br#"{"commands": ["#).await.unwrap();
        drop(client);

        let message = read_message(&mut server, 64).await.unwrap();
        assert_eq!(message.as_deref(), Some(&br#"{"commands": ["#[..]));
    }

    #[tokio::test]
    async fn oversized_message_is_rejected() {
        let (mut client, mut server) = duplex(4096);
        let payload = format!(r#"{{"commands":"{}"}}"#, "x".repeat(200));
        client.write_all(payload.as_bytes()).await.unwrap();

        let err = read_message(&mut server, 100).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { limit: 100 }));
    }

    #[tokio::test]
    async fn write_appends_newline() {
        let (mut client, mut server) = duplex(64);
        write_message(&mut client, b"{}").await.unwrap();
        drop(client);

        let mut out = Vec::new();
        server.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"{}\n");
    }
}
