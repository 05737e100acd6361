//! Packet header encoding and decoding.

use super::message::MessageType;
use crate::core::{
    CodecError, ErrorCode, HEADER_SIZE, MAGIC, MAX_PAYLOAD, NACK_PAYLOAD_SIZE, PROTOCOL_VERSION,
};

/// Packet header.
///
/// Wire format (28 bytes, big-endian):
/// ```text
/// +--------+---------+------+-------+------------+---------+--------+----------+
/// | Magic  | Version | Type | Flags | Session ID | Seq Num | Length | Address  |
/// | 4      | 2       | 1    | 1     | 4          | 4       | 4      | 8        |
/// +--------+---------+------+-------+------------+---------+--------+----------+
/// ```
///
/// The type byte is kept raw so that unknown types survive decoding and can
/// be NACKed by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Protocol identifier, [`MAGIC`] for valid packets.
    pub magic: u32,
    /// Protocol version.
    pub version: u16,
    /// Raw message type.
    pub msg_type: u8,
    /// Reserved.
    pub flags: u8,
    /// Session id assigned by the accepting side.
    pub session_id: u32,
    /// Sequence number; responses echo the request's.
    pub seq_num: u32,
    /// Payload length, or requested size for read requests.
    pub length: u32,
    /// Target offset, or IRQ number.
    pub address: u64,
}

impl PacketHeader {
    /// Create a header with the protocol magic and version.
    pub fn new(msg_type: MessageType, session_id: u32, seq_num: u32) -> Self {
        Self {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            msg_type: msg_type.as_byte(),
            flags: 0,
            session_id,
            seq_num,
            length: 0,
            address: 0,
        }
    }

    /// Parsed message type, `None` for unknown values.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_byte(self.msg_type)
    }

    /// Whether the magic matches the protocol identifier.
    pub fn has_valid_magic(&self) -> bool {
        self.magic == MAGIC
    }

    /// Number of payload bytes that follow this header on the wire.
    pub fn wire_payload_len(&self) -> usize {
        match self.message_type() {
            Some(ty) if ty.is_read_request() => 0,
            _ => self.length as usize,
        }
    }

    /// Serialize to bytes (28 bytes).
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4..6].copy_from_slice(&self.version.to_be_bytes());
        buf[6] = self.msg_type;
        buf[7] = self.flags;
        buf[8..12].copy_from_slice(&self.session_id.to_be_bytes());
        buf[12..16].copy_from_slice(&self.seq_num.to_be_bytes());
        buf[16..20].copy_from_slice(&self.length.to_be_bytes());
        buf[20..28].copy_from_slice(&self.address.to_be_bytes());
        buf
    }

    /// Parse from bytes. Magic is not validated here.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CodecError::TooShort {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let be32 = |at: usize| {
            u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };

        let mut address = [0u8; 8];
        address.copy_from_slice(&bytes[20..28]);

        Ok(Self {
            magic: be32(0),
            version: u16::from_be_bytes([bytes[4], bytes[5]]),
            msg_type: bytes[6],
            flags: bytes[7],
            session_id: be32(8),
            seq_num: be32(12),
            length: be32(16),
            address: u64::from_be_bytes(address),
        })
    }
}

/// A header plus its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet header.
    pub header: PacketHeader,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a packet whose `length` is the payload size.
    pub fn new(mut header: PacketHeader, payload: Vec<u8>) -> Self {
        header.length = payload.len() as u32;
        Self { header, payload }
    }

    /// Build a request carrying `payload` for `address`.
    pub fn request(
        msg_type: MessageType,
        session_id: u32,
        seq_num: u32,
        address: u64,
        payload: Vec<u8>,
    ) -> Self {
        let mut header = PacketHeader::new(msg_type, session_id, seq_num);
        header.address = address;
        Self::new(header, payload)
    }

    /// Build a read request for `len` bytes at `address`; no payload.
    pub fn read_request(
        msg_type: MessageType,
        session_id: u32,
        seq_num: u32,
        address: u64,
        len: u32,
    ) -> Self {
        let mut header = PacketHeader::new(msg_type, session_id, seq_num);
        header.address = address;
        header.length = len;
        Self {
            header,
            payload: Vec::new(),
        }
    }

    /// ACK echoing `seq_num`.
    pub fn ack(session_id: u32, seq_num: u32, payload: Vec<u8>) -> Self {
        Self::new(PacketHeader::new(MessageType::Ack, session_id, seq_num), payload)
    }

    /// NACK echoing `seq_num` with a 4-byte error code.
    pub fn nack(session_id: u32, seq_num: u32, code: ErrorCode) -> Self {
        Self::new(
            PacketHeader::new(MessageType::Nack, session_id, seq_num),
            code.as_u32().to_be_bytes().to_vec(),
        )
    }

    /// HANDSHAKE announcing `session_id`.
    pub fn handshake(session_id: u32, seq_num: u32) -> Self {
        Self::new(
            PacketHeader::new(MessageType::Handshake, session_id, seq_num),
            Vec::new(),
        )
    }

    /// Zero-payload KEEPALIVE.
    pub fn keepalive(session_id: u32, seq_num: u32) -> Self {
        Self::new(
            PacketHeader::new(MessageType::Keepalive, session_id, seq_num),
            Vec::new(),
        )
    }

    /// IRQ carrying the interrupt number in the address field.
    pub fn irq(session_id: u32, seq_num: u32, irq: u32) -> Self {
        Self::request(MessageType::Irq, session_id, seq_num, irq as u64, Vec::new())
    }

    /// Parsed message type.
    pub fn message_type(&self) -> Option<MessageType> {
        self.header.message_type()
    }

    /// Sequence number.
    pub fn seq_num(&self) -> u32 {
        self.header.seq_num
    }

    /// Error code of a NACK, if the payload carries one.
    pub fn nack_code(&self) -> Option<ErrorCode> {
        let bytes: [u8; NACK_PAYLOAD_SIZE] =
            self.payload.get(..NACK_PAYLOAD_SIZE)?.try_into().ok()?;
        Some(ErrorCode::from_u32(u32::from_be_bytes(bytes)))
    }

    /// Size of the encoded packet.
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode header and payload.
    pub fn encode(&self) -> Vec<u8> {
        encode(&self.header, &self.payload)
    }

    /// Decode a packet from a buffer.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        decode(bytes)
    }
}

/// Serialize `header` followed by `payload` verbatim.
pub fn encode(header: &PacketHeader, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Parse a header and take the payload up to the declared wire length or the
/// end of the buffer, whichever comes first.
pub fn decode(bytes: &[u8]) -> Result<Packet, CodecError> {
    let header = PacketHeader::from_bytes(bytes)?;
    let declared = header.wire_payload_len();
    if declared > MAX_PAYLOAD {
        return Err(CodecError::PayloadTooLarge(header.length));
    }

    let available = bytes.len() - HEADER_SIZE;
    let end = HEADER_SIZE + declared.min(available);
    Ok(Packet {
        header,
        payload: bytes[HEADER_SIZE..end].to_vec(),
    })
}
