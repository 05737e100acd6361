//! Core types for the virtual PCIe link.
//!
//! This module has no I/O dependencies: protocol constants, error types and
//! the capability traits the address space and dispatcher are built on.

mod constants;
mod error;
mod traits;

pub use constants::*;
pub use error::*;
pub use traits::*;
