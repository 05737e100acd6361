//! Inbound packet routing.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::pending::PendingRequests;
use crate::core::{AccessError, ErrorCode, IrqSink, MAX_PAYLOAD};
use crate::protocol::{MessageType, Packet};
use crate::session::Session;
use crate::space::AddressSpace;

/// Routes decoded packets to their handlers and builds the response.
///
/// The dispatcher is the only path from the network into the address space.
/// It runs on the receive task and never blocks on I/O, so each packet is
/// fully handled before the next one is read.
pub struct Dispatcher {
    session: Arc<Session>,
    space: Arc<AddressSpace>,
    irq: Option<Arc<dyn IrqSink>>,
    pending: Arc<PendingRequests>,
}

impl Dispatcher {
    /// Create a dispatcher over `session` and `space`.
    pub fn new(
        session: Arc<Session>,
        space: Arc<AddressSpace>,
        irq: Option<Arc<dyn IrqSink>>,
        pending: Arc<PendingRequests>,
    ) -> Self {
        Self {
            session,
            space,
            irq,
            pending,
        }
    }

    /// Session this dispatcher updates.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Address space inbound requests target.
    pub fn space(&self) -> &Arc<AddressSpace> {
        &self.space
    }

    /// Outstanding outbound requests completed by ACK/NACK.
    pub fn pending(&self) -> &Arc<PendingRequests> {
        &self.pending
    }

    /// Handle one packet. Returns the response to enqueue, if any.
    pub fn dispatch(&self, packet: &Packet) -> Option<Packet> {
        let stats = self.session.stats();
        stats.record_rx(packet.payload.len());

        let header = &packet.header;
        let seq = header.seq_num;

        if !header.has_valid_magic() {
            stats.record_error();
            warn!(
                device = self.session.device_id(),
                magic = format_args!("{:#010x}", header.magic),
                seq,
                "bad magic"
            );
            return Some(self.nack(seq, ErrorCode::Malformed));
        }

        let Some(msg_type) = header.message_type() else {
            stats.record_error();
            warn!(
                device = self.session.device_id(),
                msg_type = header.msg_type,
                seq,
                "unknown message type"
            );
            return Some(self.nack(seq, ErrorCode::InvalidArgument));
        };

        debug!(
            device = self.session.device_id(),
            ?msg_type,
            seq,
            address = header.address,
            length = header.length,
            "dispatch"
        );

        match msg_type {
            MessageType::ConfigRead => Some(self.handle_read(packet, |offset, buf| {
                self.space.config_read(offset, buf)
            })),
            MessageType::MemRead => Some(self.handle_read(packet, |addr, buf| {
                self.space.mem_read(addr, buf)
            })),
            MessageType::ConfigWrite => Some(self.handle_write(packet, |offset, data| {
                self.space.config_write(offset, data)
            })),
            MessageType::MemWrite => Some(self.handle_write(packet, |addr, data| {
                self.space.mem_write(addr, data)
            })),
            MessageType::Irq => Some(self.handle_irq(packet)),
            MessageType::Ack => {
                self.handle_ack(packet);
                None
            }
            MessageType::Nack => {
                self.handle_nack(packet);
                None
            }
            MessageType::Handshake => {
                self.session.complete_handshake(header.session_id, 0);
                info!(
                    device = self.session.device_id(),
                    session_id = header.session_id,
                    "handshake complete"
                );
                Some(self.ack(seq, Vec::new()))
            }
            MessageType::Keepalive => None,
            MessageType::DmaRead | MessageType::DmaWrite => {
                stats.record_error();
                warn!(device = self.session.device_id(), ?msg_type, seq, "DMA not supported");
                Some(self.nack(seq, ErrorCode::InvalidArgument))
            }
        }
    }

    fn handle_read<F>(&self, packet: &Packet, read: F) -> Packet
    where
        F: FnOnce(u64, &mut [u8]) -> Result<(), AccessError>,
    {
        let header = &packet.header;
        let len = header.length as usize;
        if len > MAX_PAYLOAD {
            return self.fail(header.seq_num, AccessError::NoMemory);
        }

        let mut buf = Vec::new();
        if buf.try_reserve_exact(len).is_err() {
            return self.fail(header.seq_num, AccessError::NoMemory);
        }
        buf.resize(len, 0);

        match read(header.address, &mut buf) {
            Ok(()) => self.ack(header.seq_num, buf),
            Err(e) => self.fail(header.seq_num, e),
        }
    }

    fn handle_write<F>(&self, packet: &Packet, write: F) -> Packet
    where
        F: FnOnce(u64, &[u8]) -> Result<(), AccessError>,
    {
        let header = &packet.header;
        let len = header.length as usize;
        let Some(data) = packet.payload.get(..len) else {
            return self.fail(
                header.seq_num,
                AccessError::InvalidArgument(format!(
                    "payload holds {} of {len} bytes",
                    packet.payload.len()
                )),
            );
        };

        match write(header.address, data) {
            Ok(()) => self.ack(header.seq_num, Vec::new()),
            Err(e) => self.fail(header.seq_num, e),
        }
    }

    fn handle_irq(&self, packet: &Packet) -> Packet {
        let header = &packet.header;
        let irq = match u32::try_from(header.address) {
            Ok(irq) => irq,
            Err(_) => {
                return self.fail(
                    header.seq_num,
                    AccessError::InvalidArgument(format!("irq {:#x}", header.address)),
                );
            }
        };

        match &self.irq {
            Some(sink) => sink.deliver(irq),
            None => debug!(device = self.session.device_id(), irq, "no irq sink"),
        }
        self.ack(header.seq_num, Vec::new())
    }

    fn handle_ack(&self, packet: &Packet) {
        let seq = packet.seq_num();
        if !self.pending.complete(seq, Ok(packet.payload.clone())) {
            debug!(device = self.session.device_id(), seq, "unsolicited ack");
        }
    }

    fn handle_nack(&self, packet: &Packet) {
        let seq = packet.seq_num();
        self.session.stats().record_error();

        let code = packet.nack_code().unwrap_or(ErrorCode::Malformed);
        warn!(device = self.session.device_id(), seq, %code, "peer nack");
        self.pending.complete(seq, Err(code));
    }

    /// NACK a well-formed request the address space refused. Counted by the
    /// requester when the NACK arrives, not here.
    fn fail(&self, seq: u32, err: AccessError) -> Packet {
        warn!(device = self.session.device_id(), seq, error = %err, "request failed");
        self.nack(seq, err.code())
    }

    fn ack(&self, seq: u32, payload: Vec<u8>) -> Packet {
        Packet::ack(self.session.session_id(), seq, payload)
    }

    fn nack(&self, seq: u32, code: ErrorCode) -> Packet {
        Packet::nack(self.session.session_id(), seq, code)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("device", &self.session.device_id())
            .field("space", &self.space)
            .field("irq_sink", &self.irq.is_some())
            .field("pending", &self.pending.len())
            .finish()
    }
}
