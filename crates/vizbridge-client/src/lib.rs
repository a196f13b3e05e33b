//! Vizbridge Client -- the caller side of the bridge protocol.
//!
//! [`Session`] owns one connection and its handshake; [`Dispatcher`] maps
//! logical operations onto session round trips and normalizes failures.

pub mod dispatch;
pub mod session;

pub use dispatch::{Dispatcher, Failure, RenderedImage};
pub use session::{CommandError, Session, SessionConfig, SessionError};
