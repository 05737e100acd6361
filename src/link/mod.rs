//! Links: one session, one address space and the tasks that serve them.
//!
//! Each connected [`Link`] runs:
//! - a receive task that reads one packet at a time and dispatches it
//!   before reading the next
//! - a transmit task draining a bounded outbound queue
//! - a keepalive timer
//!
//! and, after an unplanned disconnect, a reconnect task with exponential
//! backoff. An explicit [`Link::disconnect`] stops all of them and disables
//! reconnecting.

mod config;
mod control;
#[allow(clippy::module_inception)]
mod link;

pub use config::*;
pub use control::*;
pub use link::*;
