//! Per-device session state.
//!
//! Handles:
//! - Role and lifecycle state
//! - Session id adoption and sequence numbering
//! - Handshake and acknowledgment signalling
//! - Statistics counters

#[allow(clippy::module_inception)]
mod session;
mod stats;

pub use session::*;
pub use stats::*;
