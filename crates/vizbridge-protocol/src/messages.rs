//! Wire message types.
//!
//! Every frame carries one JSON object. Requests and responses are typed
//! here, but the codec itself works on raw objects ([`Message`]) so that a
//! malformed envelope can still be reported with its `request_id`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolError;

/// A decoded frame: always a JSON object.
pub type Message = serde_json::Map<String, Value>;

/// Command names understood by the bridge.
pub mod commands {
    pub const HELLO: &str = "hello";
    pub const PING: &str = "ping";
    pub const EXECUTE_CODE: &str = "execute_code";
    pub const INSPECT_STATE: &str = "inspect_state";
    pub const RENDER_IMAGE: &str = "render_image";
    pub const GET_HISTORY: &str = "get_history";
    pub const RESTORE_SNAPSHOT: &str = "restore_snapshot";

    /// Advertised in the hello reply.
    pub const CAPABILITIES: &[&str] = &[
        PING,
        EXECUTE_CODE,
        INSPECT_STATE,
        RENDER_IMAGE,
        GET_HISTORY,
        RESTORE_SNAPSHOT,
    ];
}

/// Error codes carried in `error.code`.
pub mod error_codes {
    pub const HANDSHAKE_REQUIRED: &str = "HANDSHAKE_REQUIRED";
    pub const PROTOCOL_MISMATCH: &str = "PROTOCOL_MISMATCH";
    pub const AUTH_FAILED: &str = "AUTH_FAILED";
    pub const CLIENT_BUSY: &str = "CLIENT_BUSY";
    pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
    pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
    pub const UNKNOWN_COMMAND: &str = "UNKNOWN_COMMAND";
    pub const EXECUTION_ERROR: &str = "EXECUTION_ERROR";
    pub const INSPECT_ERROR: &str = "INSPECT_ERROR";
    pub const RENDER_ERROR: &str = "RENDER_ERROR";
    pub const HISTORY_ERROR: &str = "HISTORY_ERROR";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const NO_SNAPSHOT: &str = "NO_SNAPSHOT";
    pub const RESTORE_FAILED: &str = "RESTORE_FAILED";
    pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";
}

// ============================================================================
// Envelope
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub request_id: String,
    #[serde(rename = "type")]
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Request {
    /// Standard command request. Params default to an empty object on the wire.
    pub fn command(request_id: String, command: &str, params: Message) -> Self {
        Self {
            request_id,
            command: command.to_string(),
            params: Some(params),
            protocol_version: None,
            auth_token: None,
        }
    }

    /// Handshake request.
    pub fn hello(request_id: String, protocol_version: u32, auth_token: &str) -> Self {
        Self {
            request_id,
            command: commands::HELLO.to_string(),
            params: None,
            protocol_version: Some(i64::from(protocol_version)),
            auth_token: Some(auth_token.to_string()),
        }
    }

    pub fn from_message(message: Message) -> Result<Self, ProtocolError> {
        serde_json::from_value(Value::Object(message))
            .map_err(|e| ProtocolError::Malformed(format!("invalid request envelope: {e}")))
    }

    /// Params, or an empty object when the request carried none.
    pub fn params(&self) -> Message {
        self.params.clone().unwrap_or_default()
    }

    pub fn into_message(self) -> Message {
        to_object(&self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Structured failure body of an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl ErrorBody {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
            traceback: None,
        }
    }

    pub fn with_details(mut self, details: Message) -> Self {
        if !details.is_empty() {
            self.details = Some(details);
        }
        self
    }

    pub fn with_traceback(mut self, traceback: Option<String>) -> Self {
        self.traceback = traceback;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(request_id: impl Into<String>, result: Message) -> Self {
        Self {
            request_id: request_id.into(),
            status: Status::Success,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(request_id: impl Into<String>, error: ErrorBody) -> Self {
        Self {
            request_id: request_id.into(),
            status: Status::Error,
            result: None,
            error: Some(error),
        }
    }

    pub fn into_message(self) -> Message {
        to_object(&self)
    }
}

// ============================================================================
// Command payloads
// ============================================================================

/// Result of a successful `hello`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloResult {
    pub protocol_version: u32,
    pub bridge_version: String,
    pub execution_ready: bool,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Result of `execute_code`. A fault inside the executed code is still a
/// successful round trip: `ok` is false and `error`/`diagnostic` are set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub ok: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

/// Result of `render_image`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub format: String,
    /// Base64 of the encoded image bytes.
    pub image_data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Ok,
    Error,
}

/// History entry as reported by `get_history`: the snapshot itself never
/// leaves the bridge, only whether one exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: u64,
    pub command: String,
    pub code: Option<String>,
    pub result: Value,
    pub status: EntryStatus,
    pub timestamp: String,
    pub has_snapshot: bool,
}

/// Result of a successful `restore_snapshot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    pub restored_entry: u64,
    pub next_id: u64,
}

/// Serialize a payload struct into a JSON object.
///
/// Only used with the derive-generated structs above, which always
/// serialize to objects.
pub fn to_object<T: Serialize>(value: &T) -> Message {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Message::new(),
    }
}
