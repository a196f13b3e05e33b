//! Request handler -- turns one decoded request into one response.
//!
//! The handler is transport-agnostic: the listener feeds it messages and
//! applies the returned [`HandlerOutcome`] (send, close, reset). It owns the
//! executor, the history log, and the host state, all touched from a single
//! control flow.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};
use vizbridge_history::{HistoryError, HistoryLog, ReplayFault, Snapshot};
use vizbridge_protocol::messages::{commands, error_codes};
use vizbridge_protocol::{
    to_object, ErrorBody, HelloResult, ImagePayload, Message, Request, Response, PROTOCOL_VERSION,
};

use crate::capabilities::{Fault, HostState, ScriptRuntime};
use crate::executor::Executor;

/// Version reported to callers in the hello reply.
pub const BRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_RENDER_WIDTH: u64 = 1600;
const DEFAULT_RENDER_HEIGHT: u64 = 900;

/// What the transport should do after handling a message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutcome {
    pub response: Option<Message>,
    pub close_connection: bool,
    pub reset_session: bool,
    pub handshake_completed: bool,
}

impl HandlerOutcome {
    fn reply(response: Response) -> Self {
        Self {
            response: Some(response.into_message()),
            ..Self::default()
        }
    }

    fn fatal(response: Response) -> Self {
        Self {
            response: Some(response.into_message()),
            close_connection: true,
            reset_session: true,
            handshake_completed: false,
        }
    }
}

/// Reply sent to a second client while one is already attached.
pub fn busy_response() -> Message {
    Response::error(
        "",
        ErrorBody::new(error_codes::CLIENT_BUSY, "another client is already connected"),
    )
    .into_message()
}

/// Outcome for a stream that broke framing. Always closes the connection.
pub fn protocol_error(message: impl Into<String>) -> HandlerOutcome {
    HandlerOutcome::fatal(Response::error(
        "",
        ErrorBody::new(error_codes::PROTOCOL_ERROR, message),
    ))
}

pub struct RequestHandler<R: ScriptRuntime, S: HostState> {
    executor: Executor<R>,
    state: S,
    history: HistoryLog,
    auth_token: String,
}

impl<R: ScriptRuntime, S: HostState> RequestHandler<R, S> {
    pub fn new(runtime: R, state: S, auth_token: impl Into<String>) -> Self {
        Self {
            executor: Executor::new(runtime),
            state,
            history: HistoryLog::new(),
            auth_token: auth_token.into(),
        }
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// Fresh environment and empty history, as at the start of a connection.
    pub fn reset_session(&mut self) -> Result<(), Fault> {
        self.history = HistoryLog::new();
        self.executor.reset()
    }

    pub fn handle(&mut self, message: Message, handshake_complete: bool) -> HandlerOutcome {
        let raw_id = message
            .get("request_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let request = match Request::from_message(message) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "handler: malformed request envelope");
                return HandlerOutcome::fatal(Response::error(
                    raw_id,
                    ErrorBody::new(error_codes::PROTOCOL_ERROR, e.to_string()),
                ));
            }
        };

        if !handshake_complete {
            if request.command != commands::HELLO {
                return HandlerOutcome::fatal(Response::error(
                    request.request_id,
                    ErrorBody::new(
                        error_codes::HANDSHAKE_REQUIRED,
                        "the first request on a new connection must be 'hello'",
                    ),
                ));
            }
            return self.hello(request);
        }

        self.command(request)
    }

    fn hello(&mut self, request: Request) -> HandlerOutcome {
        let received = request.protocol_version.unwrap_or(-1);
        if received != i64::from(PROTOCOL_VERSION) {
            let mut details = Message::new();
            details.insert("expected".into(), json!(PROTOCOL_VERSION));
            details.insert("received".into(), json!(received));
            return HandlerOutcome::fatal(Response::error(
                request.request_id,
                ErrorBody::new(
                    error_codes::PROTOCOL_MISMATCH,
                    "the requested protocol version is not supported",
                )
                .with_details(details),
            ));
        }

        if request.auth_token.as_deref().unwrap_or_default() != self.auth_token {
            tracing::warn!("handler: rejected hello with a bad auth token");
            return HandlerOutcome::fatal(Response::error(
                request.request_id,
                ErrorBody::new(error_codes::AUTH_FAILED, "the authentication token was rejected"),
            ));
        }

        let mut execution_ready = self.executor.is_ready();
        if let Err(fault) = self.reset_session() {
            tracing::warn!(error = %fault, "handler: session reset failed, execution unavailable");
            execution_ready = false;
        }

        let result = HelloResult {
            protocol_version: PROTOCOL_VERSION,
            bridge_version: BRIDGE_VERSION.to_string(),
            execution_ready,
            capabilities: commands::CAPABILITIES.iter().map(|c| c.to_string()).collect(),
        };

        HandlerOutcome {
            handshake_completed: true,
            ..HandlerOutcome::reply(Response::success(request.request_id, to_object(&result)))
        }
    }

    fn command(&mut self, request: Request) -> HandlerOutcome {
        let params = request.params();
        let id = request.request_id;

        let response = match request.command.as_str() {
            commands::PING => {
                let mut result = Message::new();
                result.insert("ok".into(), Value::Bool(true));
                Response::success(id, result)
            }
            commands::EXECUTE_CODE => self.execute_code(id, &params),
            commands::INSPECT_STATE => self.inspect_state(id),
            commands::RENDER_IMAGE => self.render_image(id, &params),
            commands::GET_HISTORY => {
                let mut result = Message::new();
                result.insert("history".into(), json!(self.history.records()));
                Response::success(id, result)
            }
            commands::RESTORE_SNAPSHOT => self.restore_snapshot(id, &params),
            other => {
                tracing::debug!(command = other, "handler: unknown command");
                Response::error(
                    id,
                    ErrorBody::new(
                        error_codes::UNKNOWN_COMMAND,
                        "the requested command is not supported",
                    ),
                )
            }
        };

        HandlerOutcome::reply(response)
    }

    fn execute_code(&mut self, id: String, params: &Message) -> Response {
        let code = params
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if code.is_empty() {
            return invalid_params(id, "execute_code requires a non-empty 'code' string");
        }

        // Mutating: capture the state first so this entry can be rolled back.
        let snapshot = self.capture_snapshot();

        let report = match self.executor.execute(&code) {
            Ok(report) => report,
            Err(fault) => {
                return fault_response(id, error_codes::EXECUTION_ERROR, fault);
            }
        };

        let summary = json!({ "stdout": report.stdout, "error": report.error });
        if let Err(e) = self
            .history
            .append(commands::EXECUTE_CODE, Some(code), snapshot, summary, report.ok)
        {
            return history_failure(id, e);
        }

        Response::success(id, to_object(&report))
    }

    fn inspect_state(&mut self, id: String) -> Response {
        match self.state.inspect() {
            Ok(listing) => {
                if let Err(e) =
                    self.history
                        .append(commands::INSPECT_STATE, None, None, Value::Null, true)
                {
                    return history_failure(id, e);
                }
                Response::success(id, listing)
            }
            Err(fault) => fault_response(id, error_codes::INSPECT_ERROR, fault),
        }
    }

    fn render_image(&mut self, id: String, params: &Message) -> Response {
        let width = dimension(params, "width", DEFAULT_RENDER_WIDTH);
        let height = dimension(params, "height", DEFAULT_RENDER_HEIGHT);
        let (Some(width), Some(height)) = (width, height) else {
            return invalid_params(id, "render_image requires positive integer 'width' and 'height'");
        };

        match self.state.render(width, height) {
            Ok(image) => {
                let summary = json!({ "format": image.format, "width": width, "height": height });
                if let Err(e) =
                    self.history
                        .append(commands::RENDER_IMAGE, None, None, summary, true)
                {
                    return history_failure(id, e);
                }
                let payload = ImagePayload {
                    format: image.format,
                    image_data: STANDARD.encode(&image.bytes),
                };
                Response::success(id, to_object(&payload))
            }
            Err(fault) => fault_response(id, error_codes::RENDER_ERROR, fault),
        }
    }

    fn restore_snapshot(&mut self, id: String, params: &Message) -> Response {
        let Some(entry_id) = params
            .get("entry_id")
            .and_then(Value::as_u64)
            .filter(|n| *n >= 1)
        else {
            return invalid_params(id, "restore_snapshot requires a positive 'entry_id' integer");
        };

        let executor = &mut self.executor;
        let state = &mut self.state;
        let restored = self.history.restore(entry_id, |snapshot| {
            // Build the replacement environment before touching live state,
            // so a failure here leaves everything as it was.
            let env = executor.fresh_environment().map_err(replay_fault)?;
            state.restore(snapshot).map_err(replay_fault)?;
            Ok(env)
        });

        match restored {
            Ok((report, env)) => {
                self.executor.install(env);
                Response::success(id, to_object(&report))
            }
            Err(e) => history_failure(id, e),
        }
    }

    fn capture_snapshot(&mut self) -> Option<Snapshot> {
        match self.state.snapshot() {
            Ok(snapshot) => Some(snapshot),
            Err(fault) => {
                tracing::warn!(error = %fault, "handler: snapshot capture failed, entry will not be restorable");
                None
            }
        }
    }
}

fn dimension(params: &Message, key: &str, default: u64) -> Option<u32> {
    let value = match params.get(key) {
        None | Some(Value::Null) => default,
        Some(v) => v.as_u64()?,
    };
    u32::try_from(value).ok().filter(|n| *n > 0)
}

fn replay_fault(fault: Fault) -> ReplayFault {
    ReplayFault {
        message: fault.message,
        diagnostic: fault.trace,
    }
}

fn invalid_params(id: String, message: &str) -> Response {
    Response::error(id, ErrorBody::new(error_codes::INVALID_PARAMS, message))
}

fn fault_response(id: String, code: &str, fault: Fault) -> Response {
    Response::error(
        id,
        ErrorBody::new(code, fault.message).with_traceback(fault.trace),
    )
}

fn history_failure(id: String, error: HistoryError) -> Response {
    let message = error.to_string();
    let body = match error {
        HistoryError::NotFound(_) => ErrorBody::new(error_codes::NOT_FOUND, message),
        HistoryError::NoSnapshot(_) => ErrorBody::new(error_codes::NO_SNAPSHOT, message),
        HistoryError::Replay { fault, .. } => {
            ErrorBody::new(error_codes::RESTORE_FAILED, message).with_traceback(fault.diagnostic)
        }
        HistoryError::Storage(_) => {
            tracing::error!(error = %message, "handler: history storage failure");
            ErrorBody::new(error_codes::HISTORY_ERROR, message)
        }
    };
    Response::error(id, body)
}
