//! Transport layer error types.

use std::io;

use thiserror::Error;

use crate::core::CodecError;

/// Transport layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Framing error on a packet that could not be skipped.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A packet was read off the stream and thrown away.
    ///
    /// The stream is still in sync; the peer should get a NACK for `seq_num`.
    #[error("discarded packet seq={seq_num}: {source}")]
    Discarded {
        /// Sequence number of the discarded packet.
        seq_num: u32,
        /// Why it was discarded.
        #[source]
        source: CodecError,
    },

    /// I/O error (socket operations).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// No connection to send on.
    #[error("not connected")]
    NotConnected,

    /// The connection went away while an operation was in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation exceeded the socket timeout.
    #[error("timed out")]
    Timeout,

    /// Outbound queue is full.
    #[error("outbound queue full")]
    QueueFull,
}

impl TransportError {
    /// Whether this error means the peer is gone and the link must be torn
    /// down.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            TransportError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            TransportError::ConnectionClosed | TransportError::Timeout => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_lost_classification() {
        let lost = [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::NotConnected,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::UnexpectedEof,
        ];
        for kind in lost {
            assert!(TransportError::Io(io::Error::from(kind)).is_connection_lost());
        }

        assert!(!TransportError::Io(io::Error::from(io::ErrorKind::Interrupted)).is_connection_lost());
        assert!(TransportError::Timeout.is_connection_lost());
        assert!(!TransportError::QueueFull.is_connection_lost());
        assert!(
            !TransportError::Discarded {
                seq_num: 1,
                source: CodecError::PayloadTooLarge(2000),
            }
            .is_connection_lost()
        );
    }
}
