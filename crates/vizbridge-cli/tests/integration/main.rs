//! Integration test entry point for vizbridge.
//!
//! Runs a real bridge listener with a scripted host in-process and drives it
//! through the client session and dispatcher.

mod harness;
mod lifecycle;
mod roundtrip;
