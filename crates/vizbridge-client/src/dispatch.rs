//! Command dispatcher -- logical operations over a shared [`Session`].
//!
//! Every operation returns either its structured result or a [`Failure`]
//! carrying a code, a message and an optional diagnostic.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};
use vizbridge_protocol::messages::commands;
use vizbridge_protocol::{ExecutionReport, HistoryRecord, Message, RestoreReport};

use crate::session::{Session, SessionError};

/// Structured failure returned to callers of the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Failure {
    pub code: String,
    pub message: String,
    pub diagnostic: Option<String>,
}

impl Failure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            diagnostic: None,
        }
    }

    /// Message followed by the diagnostic on its own line, when there is one.
    pub fn summary(&self) -> String {
        match &self.diagnostic {
            Some(diagnostic) => format!("{}\n{}", self.message, diagnostic),
            None => self.message.clone(),
        }
    }
}

impl From<SessionError> for Failure {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::Command(cmd) | SessionError::Handshake(cmd) => Failure {
                code: cmd.code,
                message: cmd.message,
                diagnostic: cmd.diagnostic,
            },
            other => Failure::new(other.code(), other.to_string()),
        }
    }
}

/// Decoded image from `render_image`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub format: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct Dispatcher {
    session: Arc<Session>,
}

impl Dispatcher {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub async fn ping(&self) -> Result<(), Failure> {
        self.session.ensure_live().await?;
        Ok(())
    }

    /// Run code in the bridge's persistent environment.
    ///
    /// A fault inside the code is reported as a failure whose message carries
    /// the fault text and whose diagnostic carries the trace.
    pub async fn execute_code(&self, code: &str) -> Result<ExecutionReport, Failure> {
        let mut params = Message::new();
        params.insert("code".into(), Value::String(code.to_string()));
        let report: ExecutionReport = self.call(commands::EXECUTE_CODE, params).await?;
        if !report.ok {
            return Err(Failure {
                code: "EXECUTION_FAILED".into(),
                message: report
                    .error
                    .clone()
                    .unwrap_or_else(|| "code execution failed".into()),
                diagnostic: report.diagnostic.clone(),
            });
        }
        Ok(report)
    }

    pub async fn inspect_state(&self) -> Result<Message, Failure> {
        self.raw(commands::INSPECT_STATE, Message::new()).await
    }

    pub async fn render_image(&self, width: u32, height: u32) -> Result<RenderedImage, Failure> {
        let params = object(json!({ "width": width, "height": height }));
        let result = self.raw(commands::RENDER_IMAGE, params).await?;

        let data = result
            .get("image_data")
            .and_then(Value::as_str)
            .filter(|d| !d.is_empty());
        let Some(data) = data else {
            return Err(Failure::new(
                "MISSING_IMAGE",
                "bridge did not return image data",
            ));
        };
        let bytes = STANDARD
            .decode(data)
            .map_err(|e| Failure::new("MISSING_IMAGE", format!("image data is not base64: {e}")))?;
        let format = result
            .get("format")
            .and_then(Value::as_str)
            .unwrap_or("png")
            .to_string();
        Ok(RenderedImage { format, bytes })
    }

    pub async fn history(&self) -> Result<Vec<HistoryRecord>, Failure> {
        let result = self.raw(commands::GET_HISTORY, Message::new()).await?;
        let history = result.get("history").cloned().unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(history)
            .map_err(|e| Failure::new("PROTOCOL_ERROR", format!("malformed history listing: {e}")))
    }

    pub async fn restore(&self, entry_id: u64) -> Result<RestoreReport, Failure> {
        let params = object(json!({ "entry_id": entry_id }));
        self.call(commands::RESTORE_SNAPSHOT, params).await
    }

    async fn raw(&self, command: &str, params: Message) -> Result<Message, Failure> {
        Ok(self.session.send_command(command, params).await?)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        command: &str,
        params: Message,
    ) -> Result<T, Failure> {
        let result = self.raw(command, params).await?;
        serde_json::from_value(Value::Object(result)).map_err(|e| {
            Failure::new(
                "PROTOCOL_ERROR",
                format!("malformed {command} result: {e}"),
            )
        })
    }
}

fn object(value: Value) -> Message {
    match value {
        Value::Object(map) => map,
        _ => Message::new(),
    }
}
