//! Transport session -- one TCP connection to the bridge.
//!
//! Lifecycle: Disconnected -> Connecting -> Handshaking -> Ready, and back to
//! Disconnected on [`Session::disconnect`] or any transport failure. A
//! reconnect is always a fresh connect + handshake; a half-open stream is
//! never reused.
//!
//! Round trips are serialized by one async mutex, which also guards the
//! stream. Any I/O or protocol failure inside that scope drops the stream
//! before the error is returned.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use vizbridge_protocol::messages::{commands, error_codes};
use vizbridge_protocol::{
    is_loopback_host, read_message, write_message, HelloResult, Message, ProtocolError,
    Request, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_TIMEOUT_SECS, MAX_FRAME_BYTES,
    PROTOCOL_VERSION,
};

/// Typed error reported by the bridge for one command.
/// The session stays usable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct CommandError {
    pub code: String,
    pub message: String,
    /// Structured details re-serialized as JSON text, else the raw traceback.
    pub diagnostic: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("bridge did not answer within {0:?}")]
    Timeout(Duration),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("bridge protocol mismatch: expected {expected}, got {received}")]
    VersionMismatch { expected: u32, received: String },
    #[error("bridge handshake did not include a bridge_version")]
    MissingBridgeVersion,
    #[error("bridge handshake did not include a valid execution_ready flag")]
    MissingReadiness,
    #[error("bridge responded with request_id {received:?}, expected {expected:?}")]
    CorrelationMismatch { expected: String, received: String },
    #[error("malformed bridge response: {0}")]
    Malformed(String),
    /// Uncorrelated error frame: the bridge refused the connection
    /// (busy, broken framing) and closed it.
    #[error("bridge rejected the connection: {0}")]
    Rejected(CommandError),
    /// The bridge refused `hello`; the stream is dropped.
    #[error("bridge refused the handshake: {0}")]
    Handshake(CommandError),
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl SessionError {
    /// Whether this error tore the connection down.
    pub fn is_transport(&self) -> bool {
        !matches!(self, SessionError::Config(_) | SessionError::Command(_))
    }

    /// Stable error code for callers that report failures as data.
    pub fn code(&self) -> &str {
        match self {
            SessionError::Command(e) | SessionError::Rejected(e) | SessionError::Handshake(e) => {
                &e.code
            }
            SessionError::Config(_) => "CONFIG_ERROR",
            SessionError::Timeout(_) => "TIMEOUT",
            SessionError::VersionMismatch { .. } => error_codes::PROTOCOL_MISMATCH,
            SessionError::MissingBridgeVersion | SessionError::MissingReadiness => {
                "HANDSHAKE_FAILED"
            }
            SessionError::Protocol(ProtocolError::Io(_))
            | SessionError::Protocol(ProtocolError::ConnectionClosed) => "CONNECTION_ERROR",
            SessionError::Protocol(_)
            | SessionError::CorrelationMismatch { .. }
            | SessionError::Malformed(_) => error_codes::PROTOCOL_ERROR,
        }
    }
}

/// Where the bridge lives and how to talk to it.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub auth_token: Option<String>,
    /// Bound on every socket operation.
    pub timeout: Duration,
    pub max_frame_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            auth_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }
}

impl SessionConfig {
    /// Reject configurations that must never reach the network.
    pub fn check(&self) -> Result<(), SessionError> {
        if self.host.trim().is_empty() {
            return Err(SessionError::Config("bridge host cannot be empty".into()));
        }
        if self.token().is_empty() && !is_loopback_host(&self.host) {
            return Err(SessionError::Config(format!(
                "an auth token is required when connecting to non-loopback host {}",
                self.host
            )));
        }
        Ok(())
    }

    fn token(&self) -> &str {
        self.auth_token.as_deref().unwrap_or_default()
    }
}

struct Connection {
    stream: TcpStream,
    bridge: HelloResult,
}

pub struct Session {
    config: SessionConfig,
    conn: Mutex<Option<Connection>>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open the connection and perform the handshake.
    /// A no-op when the session is already Ready.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let mut guard = self.conn.lock().await;
        self.ensure_connected(&mut guard).await
    }

    pub async fn disconnect(&self) {
        let mut guard = self.conn.lock().await;
        if guard.take().is_some() {
            tracing::info!(host = %self.config.host, port = self.config.port, "disconnected from bridge");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Handshake result of the live connection, if any.
    pub async fn bridge_info(&self) -> Option<HelloResult> {
        self.conn.lock().await.as_ref().map(|c| c.bridge.clone())
    }

    /// Send one command and return its result object.
    ///
    /// Connects first if the session is Disconnected.
    pub async fn send_command(
        &self,
        command: &str,
        params: Message,
    ) -> Result<Message, SessionError> {
        let mut guard = self.conn.lock().await;
        self.ensure_connected(&mut guard).await?;
        let Some(conn) = guard.as_mut() else {
            return Err(SessionError::Malformed("connection vanished after connect".into()));
        };

        let request = Request::command(new_request_id(), command, params);
        let outcome = self.round_trip(&mut conn.stream, request).await;
        if let Err(e) = &outcome {
            if e.is_transport() {
                tracing::warn!(command, error = %e, "round trip failed, dropping connection");
                *guard = None;
            }
        }
        outcome
    }

    pub async fn ping(&self) -> Result<(), SessionError> {
        self.send_command(commands::PING, Message::new()).await?;
        Ok(())
    }

    /// Validate a Ready session with a ping, reconnecting if it went stale.
    pub async fn ensure_live(&self) -> Result<(), SessionError> {
        if self.is_connected().await {
            match self.ping().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping stale bridge session");
                    self.disconnect().await;
                }
            }
        }
        self.connect().await
    }

    async fn ensure_connected(&self, slot: &mut Option<Connection>) -> Result<(), SessionError> {
        if slot.is_some() {
            return Ok(());
        }
        self.config.check()?;

        let addr = (self.config.host.as_str(), self.config.port);
        tracing::debug!(host = %self.config.host, port = self.config.port, "connecting to bridge");
        let mut stream = self.bounded(TcpStream::connect(addr)).await?.map_err(ProtocolError::Io)?;

        // On failure the stream is dropped here, never stored.
        let bridge = self.handshake(&mut stream).await?;
        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            bridge_version = %bridge.bridge_version,
            "connected to bridge"
        );
        *slot = Some(Connection { stream, bridge });
        Ok(())
    }

    async fn handshake(&self, stream: &mut TcpStream) -> Result<HelloResult, SessionError> {
        let request = Request::hello(new_request_id(), PROTOCOL_VERSION, self.config.token());
        let result = self.round_trip(stream, request).await.map_err(|e| match e {
            SessionError::Command(e) => SessionError::Handshake(e),
            other => other,
        })?;

        let version = result.get("protocol_version");
        if version.and_then(Value::as_u64) != Some(u64::from(PROTOCOL_VERSION)) {
            return Err(SessionError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                received: version.map(Value::to_string).unwrap_or_else(|| "none".into()),
            });
        }
        let bridge_version = match result.get("bridge_version").and_then(Value::as_str) {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => return Err(SessionError::MissingBridgeVersion),
        };
        let Some(execution_ready) = result.get("execution_ready").and_then(Value::as_bool) else {
            return Err(SessionError::MissingReadiness);
        };
        if !execution_ready {
            tracing::warn!("bridge connected but its execution runtime is not ready");
        }

        let capabilities = result
            .get("capabilities")
            .and_then(Value::as_array)
            .map(|caps| {
                caps.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(HelloResult {
            protocol_version: PROTOCOL_VERSION,
            bridge_version,
            execution_ready,
            capabilities,
        })
    }

    /// Exactly one request/response exchange with correlation checking.
    async fn round_trip(
        &self,
        stream: &mut TcpStream,
        request: Request,
    ) -> Result<Message, SessionError> {
        let request_id = request.request_id.clone();
        let max = self.config.max_frame_bytes;

        self.bounded(write_message(stream, &request.into_message(), max))
            .await??;
        let response = self.bounded(read_message(stream, max)).await??;

        let received = response
            .get("request_id")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if received.is_empty() {
            if let Err(SessionError::Command(e)) = unwrap_result(response.clone()) {
                return Err(SessionError::Rejected(e));
            }
        }
        if received != request_id {
            return Err(SessionError::CorrelationMismatch {
                expected: request_id,
                received: received.to_string(),
            });
        }
        unwrap_result(response)
    }

    async fn bounded<F: Future>(&self, fut: F) -> Result<F::Output, SessionError> {
        tokio::time::timeout(self.config.timeout, fut)
            .await
            .map_err(|_| SessionError::Timeout(self.config.timeout))
    }
}

fn new_request_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// Turn a correlated response into its result or a typed command error.
fn unwrap_result(mut response: Message) -> Result<Message, SessionError> {
    match response.get("status").and_then(Value::as_str) {
        Some("success") => match response.remove("result") {
            None => Ok(Message::new()),
            Some(Value::Object(result)) => Ok(result),
            Some(_) => Err(SessionError::Malformed(
                "bridge returned a non-object success payload".into(),
            )),
        },
        Some("error") => match response.remove("error") {
            Some(Value::Object(error)) => Err(SessionError::Command(command_error(&error))),
            _ => Err(SessionError::Malformed(
                "bridge returned a malformed error payload".into(),
            )),
        },
        _ => Err(SessionError::Malformed("response status must be success or error".into())),
    }
}

fn command_error(error: &Message) -> CommandError {
    let code = error
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or(error_codes::UNKNOWN_ERROR);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown bridge error");
    let diagnostic = match error.get("details") {
        Some(Value::Object(details)) if !details.is_empty() => serde_json::to_string(details).ok(),
        _ => error
            .get("traceback")
            .and_then(Value::as_str)
            .map(str::to_string),
    };
    CommandError {
        code: code.to_string(),
        message: message.to_string(),
        diagnostic,
    }
}
