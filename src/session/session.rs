//! Session state shared by the transport tasks and the dispatcher.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use tokio::sync::watch;

use super::stats::LinkStats;

/// Device role on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Role {
    /// Not yet chosen.
    #[default]
    None = 0,
    /// Initiates the connection and adopts the peer's session id.
    RootComplex = 1,
    /// Accepts the connection and assigns the session id.
    Endpoint = 2,
    /// Local self-test without a socket.
    Loopback = 3,
}

impl Role {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::RootComplex,
            2 => Self::Endpoint,
            3 => Self::Loopback,
            _ => Self::None,
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No socket.
    #[default]
    Disconnected,
    /// Opening the socket.
    Connecting,
    /// Socket open, waiting for the session id.
    Handshaking,
    /// Session id known, traffic flowing.
    Established,
    /// Waiting between reconnect attempts.
    Reconnecting,
}

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Handshake {
    /// No handshake received on the current connection.
    #[default]
    Pending,
    /// Handshake done with a result code (0 for success).
    Complete(i32),
}

/// Per-device session.
///
/// Lives across reconnects; only the socket and its tasks are replaced.
/// Scalars on the packet path are atomics so the receive and transmit tasks
/// never contend on a lock.
#[derive(Debug)]
pub struct Session {
    device_id: u32,
    role: AtomicU8,
    connected: AtomicBool,
    session_id: AtomicU32,
    seq_num: AtomicU32,
    state: watch::Sender<LinkState>,
    handshake: watch::Sender<Handshake>,
    stats: LinkStats,
}

impl Session {
    /// Create a disconnected session for `device_id`.
    pub fn new(device_id: u32) -> Self {
        Self {
            device_id,
            role: AtomicU8::new(Role::None as u8),
            connected: AtomicBool::new(false),
            session_id: AtomicU32::new(0),
            seq_num: AtomicU32::new(0),
            state: watch::Sender::new(LinkState::Disconnected),
            handshake: watch::Sender::new(Handshake::Pending),
            stats: LinkStats::default(),
        }
    }

    /// Device this session belongs to.
    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    /// Current role.
    pub fn role(&self) -> Role {
        Role::from_u8(self.role.load(Ordering::Acquire))
    }

    /// Change the role.
    pub fn set_role(&self, role: Role) {
        self.role.store(role as u8, Ordering::Release);
    }

    /// Whether a socket (or loopback) is live.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Set the connected flag.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Session id in use; 0 until a handshake has been seen.
    pub fn session_id(&self) -> u32 {
        self.session_id.load(Ordering::Acquire)
    }

    /// Sequence number for the next packet this side originates.
    ///
    /// The first call returns 1.
    pub fn next_seq(&self) -> u32 {
        self.seq_num.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Move to `state`.
    pub fn set_state(&self, state: LinkState) {
        self.state.send_replace(state);
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Current handshake progress.
    pub fn handshake(&self) -> Handshake {
        *self.handshake.borrow()
    }

    /// Adopt `session_id`, record `result`, and release handshake waiters.
    pub fn complete_handshake(&self, session_id: u32, result: i32) {
        self.session_id.store(session_id, Ordering::Release);
        self.handshake.send_replace(Handshake::Complete(result));
        self.set_state(LinkState::Established);
    }

    /// Forget the previous connection's handshake.
    pub fn reset_handshake(&self) {
        self.handshake.send_replace(Handshake::Pending);
    }

    /// Wait until a handshake completes and return its result code.
    pub async fn wait_handshake(&self) -> i32 {
        let mut rx = self.handshake.subscribe();
        loop {
            if let Handshake::Complete(result) = *rx.borrow_and_update() {
                return result;
            }
            // The sender lives in `self`, so this cannot fail while we borrow it.
            if rx.changed().await.is_err() {
                return -1;
            }
        }
    }

    /// Statistics counters.
    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_new_session() {
        let session = Session::new(3);
        assert_eq!(session.device_id(), 3);
        assert_eq!(session.role(), Role::None);
        assert_eq!(session.state(), LinkState::Disconnected);
        assert_eq!(session.handshake(), Handshake::Pending);
        assert_eq!(session.session_id(), 0);
        assert!(!session.is_connected());
    }

    #[test]
    fn test_sequence_numbers_are_monotonic() {
        let session = Session::new(0);
        assert_eq!(session.next_seq(), 1);
        assert_eq!(session.next_seq(), 2);
        assert_eq!(session.next_seq(), 3);
    }

    #[test]
    fn test_role_roundtrip() {
        let session = Session::new(0);
        for role in [Role::RootComplex, Role::Endpoint, Role::Loopback, Role::None] {
            session.set_role(role);
            assert_eq!(session.role(), role);
        }
    }

    #[test]
    fn test_complete_handshake_adopts_id() {
        let session = Session::new(0);
        session.set_state(LinkState::Handshaking);
        session.complete_handshake(42, 0);

        assert_eq!(session.session_id(), 42);
        assert_eq!(session.state(), LinkState::Established);
        assert_eq!(session.handshake(), Handshake::Complete(0));

        session.reset_handshake();
        assert_eq!(session.handshake(), Handshake::Pending);
        assert_eq!(session.session_id(), 42);
    }

    #[tokio::test]
    async fn test_wait_handshake_released() {
        let session = Arc::new(Session::new(0));
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.wait_handshake().await })
        };

        tokio::task::yield_now().await;
        session.complete_handshake(7, 0);

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("handshake waiter timed out")
            .unwrap();
        assert_eq!(result, 0);
    }

    #[tokio::test]
    async fn test_wait_handshake_already_complete() {
        let session = Session::new(0);
        session.complete_handshake(1, 0);
        assert_eq!(session.wait_handshake().await, 0);
    }
}
