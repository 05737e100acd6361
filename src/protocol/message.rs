//! Message type identifiers.

/// Message types carried in the header `type` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Read from configuration space.
    ConfigRead = 0x01,
    /// Write to configuration space.
    ConfigWrite = 0x02,
    /// Read from a mapped BAR.
    MemRead = 0x03,
    /// Write to a mapped BAR.
    MemWrite = 0x04,
    /// Raise an interrupt; the address field carries the IRQ number.
    Irq = 0x05,
    /// Reserved, not handled.
    DmaRead = 0x06,
    /// Reserved, not handled.
    DmaWrite = 0x07,
    /// Positive response; echoes the request sequence number.
    Ack = 0x10,
    /// Negative response with a 4-byte error code.
    Nack = 0x11,
    /// Carries the authoritative session id.
    Handshake = 0x20,
    /// One-way liveness packet.
    Keepalive = 0x21,
}

impl MessageType {
    /// Parse a message type from a byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::ConfigRead),
            0x02 => Some(Self::ConfigWrite),
            0x03 => Some(Self::MemRead),
            0x04 => Some(Self::MemWrite),
            0x05 => Some(Self::Irq),
            0x06 => Some(Self::DmaRead),
            0x07 => Some(Self::DmaWrite),
            0x10 => Some(Self::Ack),
            0x11 => Some(Self::Nack),
            0x20 => Some(Self::Handshake),
            0x21 => Some(Self::Keepalive),
            _ => None,
        }
    }

    /// Byte representation.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Read requests use `length` as the requested size and carry no payload.
    pub fn is_read_request(self) -> bool {
        matches!(self, Self::ConfigRead | Self::MemRead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_bytes() {
        for byte in 0..=u8::MAX {
            if let Some(ty) = MessageType::from_byte(byte) {
                assert_eq!(ty.as_byte(), byte);
            }
        }
        assert_eq!(MessageType::from_byte(0x21), Some(MessageType::Keepalive));
        assert_eq!(MessageType::from_byte(0x08), None);
        assert_eq!(MessageType::from_byte(0xFF), None);
    }

    #[test]
    fn test_read_requests() {
        assert!(MessageType::ConfigRead.is_read_request());
        assert!(MessageType::MemRead.is_read_request());
        assert!(!MessageType::ConfigWrite.is_read_request());
        assert!(!MessageType::Ack.is_read_request());
    }
}
