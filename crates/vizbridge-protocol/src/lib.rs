//! Vizbridge Protocol -- wire types, frame codec, shared constants.
//!
//! One TCP stream per caller session.
//! 4-byte big-endian length prefix + UTF-8 JSON object payload.

pub mod codec;
pub mod messages;

pub use codec::{
    decode_payload, encode_message, read_message, write_message, FrameBuffer, FrameCodec,
};
pub use messages::*;

/// Current protocol version. Both sides must match exactly.
pub const PROTOCOL_VERSION: u32 = 2;

/// Maximum frame payload: 25 MiB (screenshots travel base64 encoded).
pub const MAX_FRAME_BYTES: usize = 25 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default bridge address.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default bridge port.
pub const DEFAULT_PORT: u16 = 9877;

/// Default bound on any single socket operation.
pub const DEFAULT_TIMEOUT_SECS: u64 = 180;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame payload is {size} bytes, exceeding the limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },
    #[error("connection closed while receiving a framed message")]
    ConnectionClosed,
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Whether `host` names the loopback interface.
///
/// Non-loopback endpoints require an auth token on both sides.
pub fn is_loopback_host(host: &str) -> bool {
    let normalized = host.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "127.0.0.1" | "localhost" | "::1")
}
