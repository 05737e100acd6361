//! Error types for the virtual PCIe link.

use thiserror::Error;

/// Error code carried in a NACK payload.
///
/// Values are errno-compatible so peers built against the C ABI interpret
/// them the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Header failed validation (bad magic).
    Malformed,
    /// Config access outside the configuration buffer.
    OutOfRange,
    /// Response could not be allocated.
    NoMemory,
    /// Unknown or unsupported message, or a malformed argument.
    InvalidArgument,
    /// No mapped BAR contains the requested range.
    NoSuchAddress,
    /// A code this side does not know about.
    Other(u32),
}

impl ErrorCode {
    /// Wire value of the code.
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Malformed => 74,
            Self::OutOfRange => 34,
            Self::NoMemory => 12,
            Self::InvalidArgument => 22,
            Self::NoSuchAddress => 6,
            Self::Other(code) => code,
        }
    }

    /// Parse a wire value; unknown values are preserved.
    pub fn from_u32(code: u32) -> Self {
        match code {
            74 => Self::Malformed,
            34 => Self::OutOfRange,
            12 => Self::NoMemory,
            22 => Self::InvalidArgument,
            6 => Self::NoSuchAddress,
            other => Self::Other(other),
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed message"),
            Self::OutOfRange => write!(f, "out of range"),
            Self::NoMemory => write!(f, "no memory"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::NoSuchAddress => write!(f, "no such address"),
            Self::Other(code) => write!(f, "error {code}"),
        }
    }
}

/// Errors from the emulated address space.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// Config access does not fit in the configuration buffer.
    #[error("config access out of range: offset={offset:#x} len={len} size={size}")]
    OutOfRange {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: usize,
        /// Configuration buffer size.
        size: usize,
    },

    /// No mapped BAR fully contains the access.
    #[error("no such address: addr={addr:#x} len={len}")]
    NoSuchAddress {
        /// Requested address.
        addr: u64,
        /// Requested length.
        len: usize,
    },

    /// Backing storage could not be allocated.
    #[error("no memory")]
    NoMemory,

    /// BAR index outside `0..MAX_BARS`.
    #[error("invalid BAR index: {0}")]
    InvalidBar(usize),

    /// Malformed request argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl AccessError {
    /// The NACK code reported to the peer for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            AccessError::OutOfRange { .. } => ErrorCode::OutOfRange,
            AccessError::NoSuchAddress { .. } => ErrorCode::NoSuchAddress,
            AccessError::NoMemory => ErrorCode::NoMemory,
            AccessError::InvalidBar(_) | AccessError::InvalidArgument(_) => {
                ErrorCode::InvalidArgument
            }
        }
    }
}

/// Errors when decoding packets.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Buffer shorter than a header.
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum size.
        expected: usize,
        /// Actual size.
        actual: usize,
    },

    /// Declared payload exceeds the protocol maximum.
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(u32),
}

/// Errors in link configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable could not be parsed.
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },

    /// Configuration is internally inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level errors.
#[derive(Debug, Error)]
pub enum VpciError {
    /// Address space error.
    #[error("access error: {0}")]
    Access(#[from] AccessError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Link error.
    #[cfg(feature = "transport")]
    #[error("link error: {0}")]
    Link(#[from] crate::link::LinkError),

    /// Registry error.
    #[cfg(feature = "registry")]
    #[error("registry error: {0}")]
    Registry(#[from] crate::registry::RegistryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_roundtrip_known() {
        for code in [
            ErrorCode::Malformed,
            ErrorCode::OutOfRange,
            ErrorCode::NoMemory,
            ErrorCode::InvalidArgument,
            ErrorCode::NoSuchAddress,
        ] {
            assert_eq!(ErrorCode::from_u32(code.as_u32()), code);
        }
    }

    #[test]
    fn test_error_code_preserves_unknown() {
        assert_eq!(ErrorCode::from_u32(999), ErrorCode::Other(999));
        assert_eq!(ErrorCode::Other(999).as_u32(), 999);
    }

    #[test]
    fn test_access_error_codes() {
        let range = AccessError::OutOfRange {
            offset: 4090,
            len: 16,
            size: 4096,
        };
        assert_eq!(range.code(), ErrorCode::OutOfRange);
        assert_eq!(
            AccessError::NoSuchAddress { addr: 0, len: 4 }.code(),
            ErrorCode::NoSuchAddress
        );
        assert_eq!(AccessError::InvalidBar(6).code(), ErrorCode::InvalidArgument);
    }
}
