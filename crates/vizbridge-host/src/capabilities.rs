//! Capabilities the host application exposes to the bridge.
//!
//! The host's scripting surface is opaque here: the bridge only calls
//! through these traits. A host embeds the bridge by implementing
//! [`ScriptRuntime`] for its interpreter and [`HostState`] for its
//! application state.

use vizbridge_history::Snapshot;
use vizbridge_protocol::Message;

/// Fault raised by the host while running code, replaying state, or serving
/// a read-only capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct Fault {
    pub message: String,
    /// Full trace text (stack trace, interpreter traceback).
    pub trace: Option<String>,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

/// Text written to the two standard output channels during one execution.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OutputCapture {
    pub stdout: String,
    pub stderr: String,
}

/// Runs code units against a persistent environment.
///
/// The environment is whatever the interpreter needs to keep bindings alive
/// between calls (a namespace, a VM context). The bridge owns it and only
/// ever replaces it wholesale.
pub trait ScriptRuntime: Send {
    type Environment: Send;

    /// Whether the interpreter is initialized and able to run code.
    fn is_ready(&self) -> bool;

    fn new_environment(&mut self) -> Result<Self::Environment, Fault>;

    /// Run `code` in `env`, writing captured output into `output`.
    /// A fault in the code itself is returned as `Err`; any output produced
    /// before the fault stays in `output`.
    fn run(
        &mut self,
        env: &mut Self::Environment,
        code: &str,
        output: &mut OutputCapture,
    ) -> Result<(), Fault>;
}

/// Encoded image returned by [`HostState::render`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub format: String,
    pub bytes: Vec<u8>,
}

/// Application state the bridge can capture, replay and observe.
pub trait HostState: Send {
    /// Capture the live state as an opaque, restorable payload.
    fn snapshot(&mut self) -> Result<Snapshot, Fault>;

    /// Discard the live state and rebuild it from `snapshot`.
    ///
    /// On failure the host must leave its live state as it was; the bridge
    /// cannot undo a half-applied replay.
    fn restore(&mut self, snapshot: &Snapshot) -> Result<(), Fault>;

    /// Structured listing of the current state.
    fn inspect(&mut self) -> Result<Message, Fault>;

    /// Render the active view into an image of the given size.
    fn render(&mut self, width: u32, height: u32) -> Result<RenderedImage, Fault>;
}
