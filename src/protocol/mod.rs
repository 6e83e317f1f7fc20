pub mod codec;
pub mod framing;

use serde::{Deserialize, Serialize};

pub use codec::{decode_request, decode_response, encode_request, encode_response, DecodeError};
pub use framing::{read_message, write_message, FrameError};

/// Classification attached to every result, per command or per batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ErrorCode {
    /// Command ran; nothing to report beyond its exit status
    Ok,
    /// Request payload is not parseable JSON
    MalformedPayload,
    /// Request payload is JSON but lacks required fields
    SchemaViolation,
    /// Command output says the program could not be found
    CommandNotFound,
    /// Anything else: timeouts, spawn failures, internal errors
    Internal,
}

impl ErrorCode {
    pub fn code(self) -> u8 {
        match self {
            ErrorCode::Ok => 0,
            ErrorCode::MalformedPayload => 1,
            ErrorCode::SchemaViolation => 2,
            ErrorCode::CommandNotFound => 3,
            ErrorCode::Internal => 4,
        }
    }
}

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

impl TryFrom<u8> for ErrorCode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ErrorCode::Ok),
            1 => Ok(ErrorCode::MalformedPayload),
            2 => Ok(ErrorCode::SchemaViolation),
            3 => Ok(ErrorCode::CommandNotFound),
            4 => Ok(ErrorCode::Internal),
            other => Err(format!("unknown error code {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    pub method: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub commands: Vec<Command>,
}

/// Outcome of a single command. Field order is the wire order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub status: bool,
    pub stdout: String,
    pub stderr: String,
    pub error_code: ErrorCode,
    pub id: String,
}

impl CommandResult {
    /// Result for a command that never produced an exit status.
    pub fn failed(id: impl Into<String>, stdout: String, stderr: String) -> Self {
        Self {
            status: false,
            stdout,
            stderr,
            error_code: ErrorCode::Internal,
            id: id.into(),
        }
    }
}

/// Batch-level rejection, sent instead of a result list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchError {
    pub status: bool,
    pub error_code: ErrorCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Results(Vec<CommandResult>),
    Rejected(BatchError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub response: ResponseBody,
}

impl Response {
    pub fn results(results: Vec<CommandResult>) -> Self {
        Self {
            response: ResponseBody::Results(results),
        }
    }

    pub fn rejected(error_code: ErrorCode) -> Self {
        Self {
            response: ResponseBody::Rejected(BatchError {
                status: false,
                error_code,
            }),
        }
    }

    /// Batch-level error code, if the whole request was rejected.
    pub fn rejection(&self) -> Option<ErrorCode> {
        match &self.response {
            ResponseBody::Rejected(err) => Some(err.error_code),
            ResponseBody::Results(_) => None,
        }
    }

    pub fn command_results(&self) -> &[CommandResult] {
        match &self.response {
            ResponseBody::Results(results) => results,
            ResponseBody::Rejected(_) => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_serialize_as_integers() {
        let json = serde_json::to_string(&ErrorCode::CommandNotFound).unwrap();
        assert_eq!(json, "3");
        let parsed: ErrorCode = serde_json::from_str("4").unwrap();
        assert_eq!(parsed, ErrorCode::Internal);
        assert!(serde_json::from_str::<ErrorCode>("9").is_err());
    }

    #[test]
    fn command_result_uses_wire_field_order() {
        let result = CommandResult {
            status: true,
            stdout: "hi\n".to_string(),
            stderr: String::new(),
            error_code: ErrorCode::Ok,
            id: "a1".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&result).unwrap(),
            r#"{"status":true,"stdout":"hi\n","stderr":"","error_code":0,"id":"a1"}"#
        );
    }

    #[test]
    fn rejected_response_is_a_single_object() {
        let response = Response::rejected(ErrorCode::SchemaViolation);
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"response":{"status":false,"error_code":2}}"#
        );
        assert_eq!(response.rejection(), Some(ErrorCode::SchemaViolation));
        assert!(response.command_results().is_empty());
    }

    #[test]
    fn failed_result_is_internal() {
        let result = CommandResult::failed("x", "partial".into(), String::new());
        assert!(!result.status);
        assert_eq!(result.error_code, ErrorCode::Internal);
        assert_eq!(result.id, "x");
    }
}
