use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, trace, warn, Instrument};

use crate::protocol::{read_message, write_message, ErrorCode, FrameError};
use crate::server::audit::AuditLogger;
use crate::server::dispatcher::Dispatcher;

/// Lifecycle of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Reading,
    Processing,
    Writing,
    Closed,
}

/// Why a connection reached [`ConnectionState::Closed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// A response was written
    Responded,
    /// Peer closed before sending anything
    PeerClosed,
    IdleTimeout,
    ReadFailed(String),
    WriteFailed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Responded => write!(f, "responded"),
            CloseReason::PeerClosed => write!(f, "peer closed without data"),
            CloseReason::IdleTimeout => write!(f, "idle timeout"),
            CloseReason::ReadFailed(e) => write!(f, "read failed: {e}"),
            CloseReason::WriteFailed(e) => write!(f, "write failed: {e}"),
        }
    }
}

/// Serves exactly one request/response exchange per connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandler {
    dispatcher: Arc<Dispatcher>,
    idle_timeout: Duration,
    max_message_bytes: usize,
    audit: AuditLogger,
}

impl ConnectionHandler {
    pub fn new(dispatcher: Arc<Dispatcher>, idle_timeout: Duration, max_message_bytes: usize) -> Self {
        Self {
            dispatcher,
            idle_timeout,
            max_message_bytes,
            audit: AuditLogger::new(),
        }
    }

    /// Run the connection to completion. The stream is shut down and dropped on every path.
    pub async fn handle<S>(&self, stream: S, peer: String) -> CloseReason
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let span = tracing::info_span!("connection", peer = %peer);
        self.run(stream, &peer).instrument(span).await
    }

    async fn run<S>(&self, mut stream: S, peer: &str) -> CloseReason
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.audit.connection_accepted(peer);
        let mut state = ConnectionState::Idle;

        let reason = self.exchange(&mut stream, &mut state).await;

        // Best effort; the stream is dropped right after regardless.
        let _ = stream.shutdown().await;
        drop(stream);
        advance(&mut state, ConnectionState::Closed);
        self.audit.connection_closed(&reason.to_string());
        reason
    }

    async fn exchange<S>(&self, stream: &mut S, state: &mut ConnectionState) -> CloseReason
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        advance(state, ConnectionState::Reading);
        let read = tokio_timeout(
            self.idle_timeout,
            read_message(stream, self.max_message_bytes),
        )
        .await;

        let response = match read {
            Err(_) => {
                debug!(timeout_secs = self.idle_timeout.as_secs_f64(), "no request before idle timeout");
                return CloseReason::IdleTimeout;
            }
            Ok(Ok(None)) => return CloseReason::PeerClosed,
            Ok(Ok(Some(payload))) => {
                advance(state, ConnectionState::Processing);
                self.audit.batch_received(payload.len());
                self.dispatcher.dispatch(&payload).await
            }
            Ok(Err(FrameError::TooLarge { limit })) => {
                advance(state, ConnectionState::Processing);
                self.dispatcher.reject(
                    ErrorCode::MalformedPayload,
                    &format!("request exceeds {limit} bytes"),
                )
            }
            Ok(Err(FrameError::Io(e))) => {
                warn!("failed to read request: {}", e);
                return CloseReason::ReadFailed(e.to_string());
            }
        };

        advance(state, ConnectionState::Writing);
        match tokio_timeout(self.idle_timeout, write_message(stream, &response)).await {
            Ok(Ok(())) => CloseReason::Responded,
            Ok(Err(e)) => {
                warn!("failed to write response: {}", e);
                CloseReason::WriteFailed(e.to_string())
            }
            Err(_) => {
                warn!("peer stopped reading the response");
                CloseReason::WriteFailed("write timed out".to_string())
            }
        }
    }
}

fn advance(state: &mut ConnectionState, next: ConnectionState) {
    trace!(from = ?*state, to = ?next, "connection state");
    *state = next;
}
