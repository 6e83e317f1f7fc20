use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::error::Category;
use thiserror::Error;

use super::{ErrorCode, Request, Response};

#[derive(Debug, Error)]
pub enum DecodeError {
    /// Bytes are not a JSON document (bad syntax, truncated, not UTF-8)
    #[error("malformed payload: {0}")]
    Malformed(#[source] serde_json::Error),
    /// Valid JSON that does not match the expected envelope
    #[error("schema violation: {0}")]
    Schema(#[source] serde_json::Error),
}

impl DecodeError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            DecodeError::Malformed(_) => ErrorCode::MalformedPayload,
            DecodeError::Schema(_) => ErrorCode::SchemaViolation,
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        match err.classify() {
            Category::Data => DecodeError::Schema(err),
            Category::Syntax | Category::Eof | Category::Io => DecodeError::Malformed(err),
        }
    }
}

fn encode<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(value)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    serde_json::from_slice(bytes).map_err(DecodeError::from)
}

pub fn encode_request(request: &Request) -> serde_json::Result<Vec<u8>> {
    encode(request)
}

pub fn decode_request(bytes: &[u8]) -> Result<Request, DecodeError> {
    decode(bytes)
}

pub fn encode_response(response: &Response) -> serde_json::Result<Vec<u8>> {
    encode(response)
}

pub fn decode_response(bytes: &[u8]) -> Result<Response, DecodeError> {
    decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, CommandResult};

    fn code_for(payload: &[u8]) -> ErrorCode {
        decode_request(payload).unwrap_err().error_code()
    }

    #[test]
    fn decodes_request_with_trailing_newline() {
        let request = decode_request(b"{\"commands\":[{\"id\":\"a1\",\"method\":\"echo hi\"}]}\n").unwrap();
        assert_eq!(
            request.commands,
            vec![Command {
                id: "a1".to_string(),
                method: "echo hi".to_string()
            }]
        );
    }

    #[test]
    fn empty_command_list_is_valid() {
        let request = decode_request(br#"{"commands":[]}"#).unwrap();
        assert!(request.commands.is_empty());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let request = decode_request(br#"{"commands":[{"id":"1","method":"ls","extra":true}],"v":2}"#).unwrap();
        assert_eq!(request.commands.len(), 1);
    }

    #[test]
    fn not_json_is_malformed() {
        assert_eq!(code_for(b"not json"), ErrorCode::MalformedPayload);
        assert_eq!(code_for(br#"{"commands": [{"id": "1""#), ErrorCode::MalformedPayload);
        assert_eq!(code_for(&[0xff, 0xfe, 0x00]), ErrorCode::MalformedPayload);
        assert_eq!(code_for(b""), ErrorCode::MalformedPayload);
    }

    #[test]
    fn missing_fields_are_schema_violations() {
        assert_eq!(code_for(br#"{"wrong_key": []}"#), ErrorCode::SchemaViolation);
        assert_eq!(code_for(br#"{"commands":[{"method":"ls"}]}"#), ErrorCode::SchemaViolation);
        assert_eq!(code_for(br#"{"commands":[{"id":"1"}]}"#), ErrorCode::SchemaViolation);
        assert_eq!(code_for(br#"{"commands":"ls"}"#), ErrorCode::SchemaViolation);
    }

    #[test]
    fn built_request_round_trips() {
        let request =
            crate::client::build_request(["echo hi", "ls -la /tmp", "printf '\\t\"q\"'"])
                .unwrap();
        let bytes = encode_request(&request).unwrap();
        assert_eq!(decode_request(&bytes).unwrap(), request);
    }

    #[test]
    fn response_round_trips_both_shapes() {
        let ok = Response::results(vec![CommandResult {
            status: false,
            stdout: String::new(),
            stderr: "sh: 1: nope: not found\n".to_string(),
            error_code: ErrorCode::CommandNotFound,
            id: "b2".to_string(),
        }]);
        let bytes = encode_response(&ok).unwrap();
        assert_eq!(decode_response(&bytes).unwrap(), ok);

        let rejected = Response::rejected(ErrorCode::MalformedPayload);
        let bytes = encode_response(&rejected).unwrap();
        assert_eq!(decode_response(&bytes).unwrap(), rejected);
    }
}
