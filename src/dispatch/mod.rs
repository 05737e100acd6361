//! Message dispatch.
//!
//! [`Dispatcher`] turns each inbound packet into address-space accesses and
//! an ACK or NACK; [`PendingRequests`] matches responses to the requests this
//! side originated by sequence number.

mod dispatcher;
mod pending;

pub use dispatcher::*;
pub use pending::*;
