//! One virtual PCIe link: session, address space and the tasks that move
//! packets between them and the peer.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::config::LinkConfig;
use crate::core::{ConfigError, ErrorCode, IrqSink, MAX_PAYLOAD};
use crate::dispatch::{Dispatcher, PendingRequests};
use crate::protocol::{MessageType, Packet};
use crate::session::{LinkState, Role, Session, StatsSnapshot};
use crate::space::AddressSpace;
use crate::transport::{self, Backoff, PacketReader, PacketWriter, TransportError};

/// Errors from link operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Socket or queue failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The peer answered with a NACK.
    #[error("peer rejected request: {0}")]
    Remote(ErrorCode),

    /// Request does not fit in one packet.
    #[error("payload of {0} bytes exceeds the packet limit")]
    PayloadTooLarge(usize),

    /// A disconnect interrupted the operation.
    #[error("cancelled by disconnect")]
    Cancelled,

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<io::Error> for LinkError {
    fn from(e: io::Error) -> Self {
        LinkError::Transport(TransportError::Io(e))
    }
}

impl LinkError {
    /// Whether the error was caused by losing the connection.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            LinkError::Transport(e) => e.is_connection_lost(),
            LinkError::Cancelled => true,
            _ => false,
        }
    }
}

/// Point-in-time view of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    /// Device id.
    pub device_id: u32,
    /// Current role.
    pub role: Role,
    /// Lifecycle state.
    pub state: LinkState,
    /// Whether a socket or loopback is live.
    pub connected: bool,
    /// Session id in use.
    pub session_id: u32,
    /// Counters.
    pub stats: StatsSnapshot,
}

#[derive(Clone)]
enum Outbound {
    Socket(mpsc::Sender<Packet>),
    Loopback,
}

struct Connection {
    generation: u64,
    outbound: Outbound,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

struct Shared {
    config: LinkConfig,
    session: Arc<Session>,
    space: Arc<AddressSpace>,
    pending: Arc<PendingRequests>,
    dispatcher: Arc<Dispatcher>,

    connection: Mutex<Option<Connection>>,
    generation: AtomicU64,
    listener: Mutex<Option<Arc<TcpListener>>>,

    /// Serialises connect, disconnect, loss handling and reconnect attempts.
    lifecycle: tokio::sync::Mutex<()>,
    /// Cleared by an explicit disconnect; gates automatic reconnects.
    enabled: watch::Sender<bool>,
    reconnecting: AtomicBool,
    reconnect: Mutex<Option<JoinHandle<()>>>,
}

/// A virtual PCIe link to one peer.
///
/// Cheap to clone; clones share the same session.
///
/// # Example
///
/// ```no_run
/// use vpcie_link::prelude::*;
///
/// # async fn run() -> Result<(), LinkError> {
/// let config = LinkConfig::builder()
///     .remote_addr("10.0.0.2:8888".parse().unwrap())
///     .build()?;
/// let link = Link::new(0, config);
/// link.connect().await?;
///
/// link.remote_config_write(0x10, &[0xDE, 0xAD]).await?;
/// let bytes = link.remote_config_read(0x10, 2).await?;
/// assert_eq!(bytes, [0xDE, 0xAD]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Link {
    shared: Arc<Shared>,
}

impl Link {
    /// Create a disconnected link with a heap-backed address space.
    pub fn new(device_id: u32, config: LinkConfig) -> Self {
        let space = Arc::new(AddressSpace::new(config.config_size));
        Self::with_space(device_id, config, space, None)
    }

    /// Create a link that delivers inbound interrupts to `sink`.
    pub fn with_irq_sink(device_id: u32, config: LinkConfig, sink: Arc<dyn IrqSink>) -> Self {
        let space = Arc::new(AddressSpace::new(config.config_size));
        Self::with_space(device_id, config, space, Some(sink))
    }

    /// Create a link over an existing address space.
    pub fn with_space(
        device_id: u32,
        config: LinkConfig,
        space: Arc<AddressSpace>,
        irq: Option<Arc<dyn IrqSink>>,
    ) -> Self {
        let session = Arc::new(Session::new(device_id));
        let pending = Arc::new(PendingRequests::new());
        let dispatcher = Arc::new(Dispatcher::new(
            session.clone(),
            space.clone(),
            irq,
            pending.clone(),
        ));

        Self {
            shared: Arc::new(Shared {
                config,
                session,
                space,
                pending,
                dispatcher,
                connection: Mutex::new(None),
                generation: AtomicU64::new(0),
                listener: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                enabled: watch::Sender::new(false),
                reconnecting: AtomicBool::new(false),
                reconnect: Mutex::new(None),
            }),
        }
    }

    /// Device id.
    pub fn device_id(&self) -> u32 {
        self.shared.session.device_id()
    }

    /// Configuration the link was created with.
    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    /// Session state.
    pub fn session(&self) -> &Arc<Session> {
        &self.shared.session
    }

    /// Emulated address space inbound requests target.
    pub fn space(&self) -> &Arc<AddressSpace> {
        &self.shared.space
    }

    /// Current role.
    pub fn role(&self) -> Role {
        self.shared.session.role()
    }

    /// Lifecycle state.
    pub fn state(&self) -> LinkState {
        self.shared.session.state()
    }

    /// Whether a socket or loopback is live.
    pub fn is_connected(&self) -> bool {
        self.shared.session.is_connected()
    }

    /// Session id in use.
    pub fn session_id(&self) -> u32 {
        self.shared.session.session_id()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.session.stats().snapshot()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.shared.session.subscribe_state()
    }

    /// Full status snapshot.
    pub fn status(&self) -> LinkStatus {
        let session = &self.shared.session;
        LinkStatus {
            device_id: session.device_id(),
            role: session.role(),
            state: session.state(),
            connected: session.is_connected(),
            session_id: session.session_id(),
            stats: session.stats().snapshot(),
        }
    }

    /// Select the accepting side for the next connect.
    ///
    /// Only [`Role::Endpoint`] can be selected explicitly; the root complex
    /// and loopback roles follow from the configuration at connect time.
    /// Returns whether the role was applied.
    pub fn set_role(&self, role: Role) -> bool {
        if role != Role::Endpoint {
            debug!(device = self.device_id(), ?role, "ignoring role change");
            return false;
        }
        self.shared.session.set_role(role);
        info!(device = self.device_id(), "role set to endpoint");
        true
    }

    /// Bind the endpoint listener if it is not bound yet and return its
    /// address.
    pub async fn listen(&self) -> Result<SocketAddr, LinkError> {
        let listener = self.shared.listener().await?;
        Ok(listener.local_addr()?)
    }

    /// Address of the endpoint listener, if bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared
            .lock_listener()
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Establish the session.
    ///
    /// Loopback links come up immediately. Endpoint links wait for one peer
    /// on the local port and send it the session id. Otherwise the link dials
    /// the remote address and waits for the peer's handshake in the
    /// background. A live link is left alone.
    pub async fn connect(&self) -> Result<(), LinkError> {
        let shared = &self.shared;
        let _guard = shared.lifecycle.lock().await;
        shared.cancel_reconnect().await;

        if shared.has_connection() {
            debug!(device = self.device_id(), "already connected");
            return Ok(());
        }

        let role = if shared.config.loopback {
            Role::Loopback
        } else if shared.session.role() == Role::Endpoint {
            Role::Endpoint
        } else {
            Role::RootComplex
        };
        shared.session.set_role(role);
        shared.enabled.send_replace(true);

        shared.establish().await
    }

    /// Tear down the session and disable automatic reconnects.
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        shared.enabled.send_replace(false);

        let _guard = shared.lifecycle.lock().await;
        shared.cancel_reconnect().await;
        shared.teardown().await;
        shared.lock_listener().take();

        shared.session.set_role(Role::None);
        shared.session.set_state(LinkState::Disconnected);
        info!(device = self.device_id(), "disconnected");
    }

    /// Disconnect and release every BAR mapping.
    pub async fn close(&self) {
        self.disconnect().await;
        self.shared.space.unmap_all();
    }

    /// Queue `packet` for transmission.
    ///
    /// Fails with [`TransportError::NotConnected`] when there is no live
    /// connection and [`TransportError::QueueFull`] when the outbound queue is
    /// full; both count as dropped.
    pub fn send(&self, packet: Packet) -> Result<(), LinkError> {
        self.shared.send(packet)
    }

    /// Read `len` bytes of the peer's configuration space.
    pub async fn remote_config_read(&self, offset: u64, len: usize) -> Result<Vec<u8>, LinkError> {
        self.read(MessageType::ConfigRead, offset, len).await
    }

    /// Write `data` into the peer's configuration space.
    pub async fn remote_config_write(&self, offset: u64, data: &[u8]) -> Result<(), LinkError> {
        self.write(MessageType::ConfigWrite, offset, data).await
    }

    /// Read `len` bytes from the peer's BAR space.
    pub async fn remote_mem_read(&self, addr: u64, len: usize) -> Result<Vec<u8>, LinkError> {
        self.read(MessageType::MemRead, addr, len).await
    }

    /// Write `data` into the peer's BAR space.
    pub async fn remote_mem_write(&self, addr: u64, data: &[u8]) -> Result<(), LinkError> {
        self.write(MessageType::MemWrite, addr, data).await
    }

    /// Raise interrupt `irq` on the peer.
    pub async fn raise_irq(&self, irq: u32) -> Result<(), LinkError> {
        let session = &self.shared.session;
        let packet = Packet::irq(session.session_id(), session.next_seq(), irq);
        self.shared.request(packet).await.map(drop)
    }

    async fn read(&self, ty: MessageType, address: u64, len: usize) -> Result<Vec<u8>, LinkError> {
        if len > MAX_PAYLOAD {
            return Err(LinkError::PayloadTooLarge(len));
        }
        let session = &self.shared.session;
        let packet =
            Packet::read_request(ty, session.session_id(), session.next_seq(), address, len as u32);
        self.shared.request(packet).await
    }

    async fn write(&self, ty: MessageType, address: u64, data: &[u8]) -> Result<(), LinkError> {
        if data.len() > MAX_PAYLOAD {
            return Err(LinkError::PayloadTooLarge(data.len()));
        }
        let session = &self.shared.session;
        let packet = Packet::request(
            ty,
            session.session_id(),
            session.next_seq(),
            address,
            data.to_vec(),
        );
        self.shared.request(packet).await.map(drop)
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("device_id", &self.device_id())
            .field("role", &self.role())
            .field("state", &self.state())
            .field("session_id", &self.session_id())
            .finish()
    }
}

impl Shared {
    fn lock_connection(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_listener(&self) -> MutexGuard<'_, Option<Arc<TcpListener>>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_reconnect(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.reconnect.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn has_connection(&self) -> bool {
        self.lock_connection().is_some()
    }

    fn device(&self) -> u32 {
        self.session.device_id()
    }

    async fn listener(&self) -> Result<Arc<TcpListener>, TransportError> {
        let bound = self.lock_listener().clone();
        if let Some(listener) = bound {
            return Ok(listener);
        }
        let listener = Arc::new(TcpListener::bind(self.config.listen_addr()).await?);
        info!(device = self.device(), addr = ?listener.local_addr().ok(), "listening");
        *self.lock_listener() = Some(listener.clone());
        Ok(listener)
    }

    /// Run `fut` unless an explicit disconnect arrives first.
    async fn until_disabled<F: Future>(&self, fut: F) -> Result<F::Output, LinkError> {
        let mut enabled = self.enabled.subscribe();
        tokio::select! {
            out = fut => Ok(out),
            _ = disabled(&mut enabled) => Err(LinkError::Cancelled),
        }
    }

    /// Open the transport for the current role. Caller holds `lifecycle`.
    async fn establish(self: &Arc<Self>) -> Result<(), LinkError> {
        let result = match self.session.role() {
            Role::Loopback => {
                self.start_loopback();
                Ok(())
            }
            Role::Endpoint => self.accept().await,
            Role::RootComplex | Role::None => self.dial().await,
        };

        if let Err(e) = &result {
            self.session.set_state(LinkState::Disconnected);
            error!(device = self.device(), error = %e, "connect failed");
        }
        result
    }

    fn start_loopback(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (stop, _) = watch::channel(false);
        *self.lock_connection() = Some(Connection {
            generation,
            outbound: Outbound::Loopback,
            stop,
            tasks: Vec::new(),
        });

        self.session.set_connected(true);
        self.session.complete_handshake(self.session.session_id(), 0);
        info!(device = self.device(), "loopback link up");
    }

    async fn dial(self: &Arc<Self>) -> Result<(), LinkError> {
        let addr = self.config.remote_addr();
        self.session.set_state(LinkState::Connecting);
        info!(device = self.device(), %addr, "connecting");

        let stream = self
            .until_disabled(transport::connect(addr, self.config.socket_timeout))
            .await??;

        self.session.reset_handshake();
        self.session.set_state(LinkState::Handshaking);
        self.start(stream);
        info!(device = self.device(), %addr, "connected, awaiting handshake");
        Ok(())
    }

    async fn accept(self: &Arc<Self>) -> Result<(), LinkError> {
        let listener = self.listener().await?;
        self.session.set_state(LinkState::Connecting);

        let (stream, peer) = self.until_disabled(listener.accept()).await??;
        stream.set_nodelay(true)?;

        let session_id = loop {
            let id: u32 = rand::random();
            if id != 0 {
                break id;
            }
        };
        self.session.complete_handshake(session_id, 0);
        self.start(stream);
        info!(device = self.device(), %peer, session_id, "accepted peer");

        let handshake = Packet::handshake(session_id, self.session.next_seq());
        self.send(handshake)
    }

    fn start(self: &Arc<Self>, stream: TcpStream) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (reader, writer) = transport::split(stream);
        let (tx, rx) = mpsc::channel(self.config.tx_queue_depth.max(1));
        let (stop, stop_rx) = watch::channel(false);
        let timeout = self.config.socket_timeout;

        self.session.set_connected(true);

        let tasks = vec![
            tokio::spawn(receive_loop(
                Arc::downgrade(self),
                self.dispatcher.clone(),
                reader,
                tx.clone(),
                stop_rx.clone(),
                generation,
                timeout,
            )),
            tokio::spawn(transmit_loop(
                self.session.clone(),
                writer,
                rx,
                stop_rx.clone(),
                timeout,
            )),
            tokio::spawn(keepalive_loop(
                self.session.clone(),
                tx.clone(),
                stop_rx,
                self.config.keepalive_interval,
            )),
        ];

        *self.lock_connection() = Some(Connection {
            generation,
            outbound: Outbound::Socket(tx),
            stop,
            tasks,
        });
    }

    /// Stop the tasks of the live connection and wait for them. Caller holds
    /// `lifecycle`.
    async fn teardown(&self) -> bool {
        let connection = self.lock_connection().take();
        let Some(connection) = connection else {
            return false;
        };

        connection.stop.send_replace(true);
        for task in connection.tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(device = self.device(), "link task panicked");
                }
            }
        }

        self.session.set_connected(false);
        self.session.reset_handshake();
        let failed = self.pending.fail_all();
        if failed > 0 {
            debug!(device = self.device(), failed, "abandoned outstanding requests");
        }
        true
    }

    /// Handle the receive task reporting that connection `generation` is gone.
    async fn connection_lost(self: Arc<Self>, generation: u64) {
        let _guard = self.lifecycle.lock().await;

        let current = self.lock_connection().as_ref().map(|c| c.generation);
        if current != Some(generation) {
            return;
        }

        self.teardown().await;
        self.session.set_state(LinkState::Disconnected);
        warn!(device = self.device(), "connection lost");

        if *self.enabled.borrow() {
            self.schedule_reconnect();
        }
    }

    /// Start the reconnect task unless one is already running. Caller holds
    /// `lifecycle`.
    fn schedule_reconnect(self: &Arc<Self>) {
        if self.reconnecting.swap(true, Ordering::AcqRel) {
            return;
        }
        self.session.stats().record_reconnect();
        let handle = tokio::spawn(reconnect_loop(Arc::downgrade(self)));
        *self.lock_reconnect() = Some(handle);
    }

    /// Abort a pending reconnect task. Caller holds `lifecycle`.
    async fn cancel_reconnect(&self) {
        let handle = self.lock_reconnect().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        self.reconnecting.store(false, Ordering::Release);
    }

    fn send(&self, packet: Packet) -> Result<(), LinkError> {
        let outbound = self.lock_connection().as_ref().map(|c| c.outbound.clone());
        match outbound {
            Some(Outbound::Socket(tx)) => Ok(enqueue(&self.session, &tx, packet)?),
            Some(Outbound::Loopback) => {
                self.loop_back(packet);
                Ok(())
            }
            None => {
                self.session.stats().record_drop();
                debug!(device = self.device(), seq = packet.seq_num(), "dropped, not connected");
                Err(TransportError::NotConnected.into())
            }
        }
    }

    /// Feed `packet` through the codec into the local dispatcher, along with
    /// whatever it answers.
    fn loop_back(&self, packet: Packet) {
        let stats = self.session.stats();
        let mut next = Some(packet);
        while let Some(packet) = next.take() {
            let bytes = packet.encode();
            stats.record_tx(bytes.len());
            match Packet::decode(&bytes) {
                Ok(decoded) => next = self.dispatcher.dispatch(&decoded),
                Err(e) => {
                    stats.record_error();
                    warn!(device = self.device(), error = %e, "loopback decode failed");
                }
            }
        }
    }

    async fn request(&self, packet: Packet) -> Result<Vec<u8>, LinkError> {
        let seq = packet.seq_num();
        let reply = self.pending.register(seq);
        self.send(packet)?;

        match tokio::time::timeout(self.config.socket_timeout, reply).await {
            Ok(Ok(Ok(payload))) => Ok(payload),
            Ok(Ok(Err(code))) => Err(LinkError::Remote(code)),
            Ok(Err(_)) => Err(TransportError::ConnectionClosed.into()),
            Err(_) => {
                self.session.stats().record_timeout();
                warn!(device = self.device(), seq, "request timed out");
                Err(TransportError::Timeout.into())
            }
        }
    }
}

fn enqueue(
    session: &Session,
    outbound: &mpsc::Sender<Packet>,
    packet: Packet,
) -> Result<(), TransportError> {
    match outbound.try_send(packet) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(packet)) => {
            session.stats().record_drop();
            warn!(device = session.device_id(), seq = packet.seq_num(), "outbound queue full");
            Err(TransportError::QueueFull)
        }
        Err(TrySendError::Closed(_)) => {
            session.stats().record_drop();
            Err(TransportError::NotConnected)
        }
    }
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

async fn disabled(enabled: &mut watch::Receiver<bool>) {
    let _ = enabled.wait_for(|enabled| !*enabled).await;
}

async fn receive_loop(
    link: Weak<Shared>,
    dispatcher: Arc<Dispatcher>,
    mut reader: PacketReader<OwnedReadHalf>,
    outbound: mpsc::Sender<Packet>,
    mut stop: watch::Receiver<bool>,
    generation: u64,
    timeout: Duration,
) {
    let session = dispatcher.session().clone();
    let stats = session.stats();
    let device = session.device_id();

    let lost = loop {
        let result = tokio::select! {
            biased;
            _ = stopped(&mut stop) => break false,
            result = tokio::time::timeout(timeout, reader.read_packet()) => result,
        };

        match result {
            Ok(Ok(Some(packet))) => {
                if let Some(response) = dispatcher.dispatch(&packet) {
                    let _ = enqueue(&session, &outbound, response);
                }
            }
            Ok(Ok(None)) => {
                info!(device, "peer closed connection");
                break true;
            }
            Ok(Err(TransportError::Discarded { seq_num, source })) => {
                stats.record_error();
                warn!(device, seq = seq_num, error = %source, "discarded packet");
                let nack = Packet::nack(session.session_id(), seq_num, ErrorCode::Malformed);
                let _ = enqueue(&session, &outbound, nack);
            }
            Ok(Err(e)) if e.is_connection_lost() => {
                stats.record_error();
                error!(device, error = %e, "receive failed");
                break true;
            }
            Ok(Err(e)) => {
                stats.record_error();
                warn!(device, error = %e, "receive error");
            }
            Err(_) => {
                stats.record_timeout();
                warn!(device, ?timeout, "receive timed out");
                break true;
            }
        }
    };

    if lost {
        if let Some(shared) = link.upgrade() {
            tokio::spawn(shared.connection_lost(generation));
        }
    }
}

async fn transmit_loop(
    session: Arc<Session>,
    mut writer: PacketWriter<OwnedWriteHalf>,
    mut queue: mpsc::Receiver<Packet>,
    mut stop: watch::Receiver<bool>,
    timeout: Duration,
) {
    let stats = session.stats();
    let device = session.device_id();

    loop {
        let packet = tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            packet = queue.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
        };

        let result = tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            result = tokio::time::timeout(timeout, writer.write_packet(&packet)) => result,
        };

        match result {
            Ok(Ok(bytes)) => {
                stats.record_tx(bytes);
                debug!(device, seq = packet.seq_num(), msg_type = packet.header.msg_type, "sent");
            }
            Ok(Err(e)) => {
                stats.record_error();
                error!(device, seq = packet.seq_num(), error = %e, "send failed");
            }
            Err(_) => {
                stats.record_error();
                error!(device, seq = packet.seq_num(), "send timed out");
            }
        }
    }
}

async fn keepalive_loop(
    session: Arc<Session>,
    outbound: mpsc::Sender<Packet>,
    mut stop: watch::Receiver<bool>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            _ = ticker.tick() => {
                if !session.is_connected() {
                    continue;
                }
                let packet = Packet::keepalive(session.session_id(), session.next_seq());
                debug!(device = session.device_id(), seq = packet.seq_num(), "keepalive");
                let _ = enqueue(&session, &outbound, packet);
            }
        }
    }
}

/// Dial until connected, disabled or dropped. The first attempt runs at
/// once; each failure waits out the next backoff delay.
async fn reconnect_loop(link: Weak<Shared>) {
    let (mut backoff, mut enabled) = match link.upgrade() {
        Some(shared) => (
            Backoff::new(shared.config.reconnect_base, shared.config.reconnect_max),
            shared.enabled.subscribe(),
        ),
        None => return,
    };

    loop {
        let Some(shared) = link.upgrade() else {
            return;
        };
        shared.session.set_state(LinkState::Reconnecting);

        {
            let _guard = shared.lifecycle.lock().await;
            if !*shared.enabled.borrow() || shared.has_connection() {
                shared.reconnecting.store(false, Ordering::Release);
                return;
            }

            match shared.establish().await {
                Ok(()) => {
                    shared.reconnecting.store(false, Ordering::Release);
                    info!(device = shared.device(), "reconnected");
                    return;
                }
                Err(e) => warn!(device = shared.device(), error = %e, "reconnect attempt failed"),
            }
            shared.session.set_state(LinkState::Reconnecting);
        }

        let delay = backoff.next_delay();
        info!(device = shared.device(), ?delay, "retrying");
        drop(shared);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = disabled(&mut enabled) => return,
        }
    }
}
