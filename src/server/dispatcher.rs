use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{debug, error};

use crate::commands::{CommandExecutor, ExecError};
use crate::protocol::{
    decode_request, encode_response, Command, CommandResult, ErrorCode, Response,
};
use crate::server::audit::AuditLogger;

/// Sent verbatim when the response itself cannot be serialized.
const INTERNAL_ERROR_RESPONSE: &[u8] = br#"{"response":{"status":false,"error_code":4}}"#;

/// Turns raw request bytes into raw response bytes. Never fails outward.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    executor: CommandExecutor,
    audit: AuditLogger,
}

impl Dispatcher {
    pub fn new(executor: CommandExecutor) -> Self {
        Self {
            executor,
            audit: AuditLogger::new(),
        }
    }

    /// Always yields response bytes. A panic while handling the batch becomes the
    /// singleton [`ErrorCode::Internal`] error.
    pub async fn dispatch(&self, raw: &[u8]) -> Vec<u8> {
        let response = match AssertUnwindSafe(self.handle(raw)).catch_unwind().await {
            Ok(response) => response,
            Err(panic) => {
                let panic_msg = panic_message(panic.as_ref());
                error!(panic_msg = %panic_msg, "batch handling panicked");
                self.audit.batch_rejected(ErrorCode::Internal, &format!("panicked: {panic_msg}"));
                Response::rejected(ErrorCode::Internal)
            }
        };
        encode(&response)
    }

    /// Response bytes for a request rejected before it reached the decoder.
    pub fn reject(&self, error_code: ErrorCode, reason: &str) -> Vec<u8> {
        self.audit.batch_rejected(error_code, reason);
        encode(&Response::rejected(error_code))
    }

    pub async fn handle(&self, raw: &[u8]) -> Response {
        let request = match decode_request(raw) {
            Ok(request) => request,
            Err(e) => {
                self.audit.batch_rejected(e.error_code(), &e.to_string());
                return Response::rejected(e.error_code());
            }
        };

        debug!(commands = request.commands.len(), "dispatching batch");
        let mut results = Vec::with_capacity(request.commands.len());
        for command in request.commands {
            results.push(self.run_one(command).await);
        }
        Response::results(results)
    }

    async fn run_one(&self, command: Command) -> CommandResult {
        match self.executor.execute(&command.method).await {
            Ok(result) => {
                self.audit.command_executed(
                    &command.id,
                    &command.method,
                    result.exit_code,
                    result.error_code,
                    result.duration,
                );
                result.into_command_result(command.id)
            }
            Err(ExecError::Timeout {
                timeout,
                stdout,
                stderr,
            }) => {
                self.audit.command_failed(
                    &command.id,
                    &command.method,
                    &format!("timed out after {}s", timeout.as_secs_f64()),
                );
                CommandResult::failed(command.id, stdout, stderr)
            }
            Err(e) => {
                let message = e.to_string();
                self.audit.command_failed(&command.id, &command.method, &message);
                CommandResult::failed(command.id, String::new(), message)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn encode(response: &Response) -> Vec<u8> {
    encode_response(response).unwrap_or_else(|e| {
        error!("failed to encode response: {}", e);
        INTERNAL_ERROR_RESPONSE.to_vec()
    })
}
