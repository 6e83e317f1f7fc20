use anyhow::{Context, Result};
use tokio::net::TcpStream;
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, trace};

use crate::client::ClientError;
use crate::config::ClientConfig;
use crate::protocol::{
    decode_response, encode_request, read_message, write_message, FrameError, Request, Response,
};

/// One connection per request: connect, send, read the reply, close.
#[derive(Debug, Clone)]
pub struct Client {
    config: ClientConfig,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub async fn send(&self, request: &Request) -> Result<Response> {
        let payload = encode_request(request).context("serialize request")?;
        let raw = self.send_raw(&payload).await?;
        decode_response(raw.as_bytes()).context("decoding server response")
    }

    /// Send already-encoded bytes and return the reply as text.
    pub async fn send_raw(&self, payload: &[u8]) -> Result<String> {
        let addr = self.config.server_addr();
        let mut stream = tokio_timeout(self.config.connect_timeout(), TcpStream::connect(&addr))
            .await
            .with_context(|| format!("connecting to {addr} timed out"))?
            .with_context(|| format!("connecting to {addr}"))?;
        debug!(addr = %addr, bytes = payload.len(), "sending request");

        write_message(&mut stream, payload)
            .await
            .context("sending request")?;

        let read = read_message(&mut stream, self.config.max_message_bytes);
        let reply = match self.config.response_timeout() {
            Some(limit) => tokio_timeout(limit, read)
                .await
                .with_context(|| format!("no response within {}s", limit.as_secs()))?,
            None => read.await,
        };

        let bytes = match reply {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Err(ClientError::NoResponse.into()),
            Err(FrameError::TooLarge { limit }) => {
                return Err(ClientError::ResponseTooLarge { limit }.into())
            }
            Err(FrameError::Io(e)) => return Err(ClientError::Io(e)).context("reading response"),
        };
        trace!(bytes = bytes.len(), "response received");

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
