//! Protocol constants.
//!
//! Wire values are fixed by the protocol and MUST NOT be changed; timing
//! values are defaults that [`LinkConfig`](crate::link::LinkConfig) can
//! override.

use std::net::Ipv4Addr;
use std::time::Duration;

// =============================================================================
// WIRE FORMAT
// =============================================================================

/// Protocol identifier carried in every header ("VICE").
pub const MAGIC: u32 = 0x5649_4345;

/// Protocol version.
pub const PROTOCOL_VERSION: u16 = 0x0001;

/// Fixed packet header size (4 + 2 + 1 + 1 + 4 + 4 + 4 + 8).
pub const HEADER_SIZE: usize = 28;

/// Maximum payload carried by a single packet.
pub const MAX_PAYLOAD: usize = 1460;

/// Size of the error code carried by a NACK.
pub const NACK_PAYLOAD_SIZE: usize = 4;

// =============================================================================
// ADDRESS SPACE
// =============================================================================

/// Number of base-address regions per device.
pub const MAX_BARS: usize = 6;

/// Default configuration space size.
pub const DEFAULT_CONFIG_SIZE: usize = 4096;

// =============================================================================
// SESSIONS
// =============================================================================

/// Maximum number of devices a registry can hold.
pub const MAX_DEVICES: usize = 16;

/// Default TCP port on both sides.
pub const DEFAULT_PORT: u16 = 8888;

/// Default remote address.
pub const DEFAULT_REMOTE_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 100);

/// Default outbound queue depth.
pub const DEFAULT_TX_QUEUE_DEPTH: usize = 256;

// =============================================================================
// TIMING
// =============================================================================

/// Interval between keepalive packets while connected.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// First reconnect delay after an unplanned disconnect.
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Ceiling for the reconnect delay.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Socket connect/send/receive timeout.
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);
