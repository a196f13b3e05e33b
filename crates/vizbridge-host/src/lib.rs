//! Vizbridge Host -- the bridge side of the protocol.
//!
//! A host application embeds this crate by implementing
//! [`ScriptRuntime`] and [`HostState`], wrapping them in a
//! [`RequestHandler`], and running a [`BridgeServer`].

pub mod capabilities;
pub mod executor;
pub mod handler;
pub mod server;

#[cfg(test)]
mod fakes;

pub use capabilities::{Fault, HostState, OutputCapture, RenderedImage, ScriptRuntime};
pub use executor::Executor;
pub use handler::{busy_response, HandlerOutcome, RequestHandler, BRIDGE_VERSION};
pub use server::{BridgeServer, ListenConfig, ServerError};
