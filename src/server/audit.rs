use std::time::Duration;

use tracing::{info, warn};

use crate::protocol::ErrorCode;

/// Structured events under the `audit` target. Connection fields come from the
/// enclosing `connection` span.
#[derive(Debug, Clone, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn connection_accepted(&self, peer: &str) {
        info!(target: "audit", event = "connection_accepted", peer);
    }

    pub fn batch_received(&self, bytes: usize) {
        info!(target: "audit", event = "batch_received", bytes);
    }

    pub fn batch_rejected(&self, error_code: ErrorCode, reason: &str) {
        warn!(target: "audit", event = "batch_rejected", error_code = error_code.code(), reason);
    }

    pub fn command_executed(
        &self,
        command_id: &str,
        method: &str,
        exit_code: Option<i32>,
        error_code: ErrorCode,
        duration: Duration,
    ) {
        info!(
            target: "audit",
            event = "command_executed",
            command_id,
            method,
            exit_code = ?exit_code,
            error_code = error_code.code(),
            duration_ms = duration.as_millis() as u64
        );
    }

    pub fn command_failed(&self, command_id: &str, method: &str, error: &str) {
        warn!(target: "audit", event = "command_failed", command_id, method, error);
    }

    pub fn connection_closed(&self, reason: &str) {
        info!(target: "audit", event = "connection_closed", reason);
    }
}
