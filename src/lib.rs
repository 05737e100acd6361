//! # vpcie-link
//!
//! **V**irtual **PCIe** over TCP.
//!
//! Tunnels a device's configuration space, memory-mapped registers and
//! interrupts over a reliable byte stream. One side (the endpoint) presents
//! an emulated address space; the other (the root complex) forwards config
//! and memory accesses to it across the network.
//!
//! - **Protocol**: a fixed 28-byte big-endian header plus opaque payload
//! - **Correlation**: every ACK/NACK echoes the request's sequence number
//! - **Lifecycle**: handshake, keepalive, and reconnect with exponential
//!   backoff after unplanned disconnects
//! - **Address space**: a flat configuration buffer plus six independently
//!   mappable base-address regions
//!
//! ## Feature Flags
//!
//! - `transport` (default): session, dispatcher and TCP link (tokio)
//! - `registry` (default): attach/detach collection of links
//!
//! ## Modules
//!
//! - [`core`]: constants, error types and capability traits (always included)
//! - [`protocol`]: message types and the packet codec (always included)
//! - [`space`]: the emulated address space (always included)
//! - [`session`], [`transport`], [`dispatch`], [`link`]: the connection
//!   engine (requires `transport`)
//! - [`registry`]: device registry (requires `registry`)
//!
//! ## Example Usage
//!
//! ```rust
//! use vpcie_link::prelude::*;
//!
//! let space = AddressSpace::default();
//! space.bar_map(0, 0xFE00_0000, 0x1000, BarKind::Memory).unwrap();
//!
//! space.mem_write(0xFE00_0010, &[0xEF, 0xBE, 0xAD, 0xDE]).unwrap();
//! let mut buf = [0u8; 4];
//! space.mem_read(0xFE00_0010, &mut buf).unwrap();
//! assert_eq!(u32::from_le_bytes(buf), 0xDEAD_BEEF);
//!
//! // Accesses that straddle the end of a region fail without effect.
//! assert!(space.mem_write(0xFE00_0FFE, &[0; 4]).is_err());
//!
//! let request = Packet::read_request(MessageType::MemRead, 42, 1, 0xFE00_0010, 4);
//! let bytes = request.encode();
//! assert_eq!(bytes.len(), HEADER_SIZE);
//! assert_eq!(Packet::decode(&bytes).unwrap(), request);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Wire protocol (always included)
pub mod protocol;

// Emulated address space (always included)
pub mod space;

// Session state (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod session;

// Transport layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Message dispatch (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod dispatch;

// Link API (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod link;

// Device registry (feature-gated)
#[cfg(feature = "registry")]
#[cfg_attr(docsrs, doc(cfg(feature = "registry")))]
pub mod registry;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;
    pub use crate::protocol::{MessageType, Packet, PacketHeader};
    pub use crate::space::{AddressSpace, BarInfo, HeapMapper, HeapRegion};

    // Connection engine (when enabled)
    #[cfg(feature = "transport")]
    pub use crate::dispatch::Dispatcher;
    #[cfg(feature = "transport")]
    pub use crate::link::{
        Command, CommandOutput, Link, LinkConfig, LinkConfigBuilder, LinkError, LinkStatus,
    };
    #[cfg(feature = "transport")]
    pub use crate::session::{Handshake, LinkState, Role, Session, StatsSnapshot};
    #[cfg(feature = "transport")]
    pub use crate::transport::TransportError;

    #[cfg(feature = "registry")]
    pub use crate::registry::{Registry, RegistryError};
}

// Re-export commonly used items at crate root
pub use crate::core::{AccessError, CodecError, ErrorCode, VpciError};
pub use crate::protocol::{MessageType, Packet, PacketHeader};
pub use crate::space::AddressSpace;

#[cfg(feature = "transport")]
pub use crate::link::{Link, LinkConfig, LinkError};
