//! Transport layer.
//!
//! Moves packets over one TCP stream per link:
//!
//! - **Framing**: [`PacketReader`] and [`PacketWriter`] turn a byte stream
//!   into whole packets and back
//! - **Errors**: [`TransportError`] with connection-loss classification
//! - **Reconnect**: [`Backoff`] schedule between attempts
//!
//! Task orchestration (receive, transmit, keepalive, reconnect) lives in
//! [`crate::link`].

mod backoff;
mod error;
mod socket;

pub use backoff::*;
pub use error::*;
pub use socket::*;
