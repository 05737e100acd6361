//! Outstanding request table keyed by sequence number.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::RecvError;

use crate::core::ErrorCode;

/// Outcome of a request: the ACK payload or the peer's NACK code.
pub type Reply = Result<Vec<u8>, ErrorCode>;

struct Waiter {
    token: u64,
    tx: oneshot::Sender<Reply>,
}

/// Requests this side originated and is waiting on.
#[derive(Default)]
pub struct PendingRequests {
    waiters: Mutex<HashMap<u32, Waiter>>,
    next_token: AtomicU64,
}

impl PendingRequests {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, Waiter>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register interest in the response to `seq_num`.
    ///
    /// Dropping the returned future withdraws the registration. A second
    /// registration for the same number replaces the first, whose future then
    /// resolves to an error.
    pub fn register(&self, seq_num: u32) -> PendingReply<'_> {
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(seq_num, Waiter { token, tx });
        PendingReply {
            table: self,
            seq_num,
            token,
            rx,
        }
    }

    /// Hand `reply` to the waiter for `seq_num`. Returns false if nobody was
    /// waiting.
    pub fn complete(&self, seq_num: u32, reply: Reply) -> bool {
        let waiter = self.lock().remove(&seq_num);
        match waiter {
            Some(waiter) => waiter.tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// Forget the waiter for `seq_num`.
    pub fn cancel(&self, seq_num: u32) {
        self.lock().remove(&seq_num);
    }

    fn withdraw(&self, seq_num: u32, token: u64) {
        let mut waiters = self.lock();
        if waiters.get(&seq_num).is_some_and(|w| w.token == token) {
            waiters.remove(&seq_num);
        }
    }

    /// Drop every waiter; their futures resolve to an error.
    pub fn fail_all(&self) -> usize {
        let mut waiters = self.lock();
        let count = waiters.len();
        waiters.clear();
        count
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl std::fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequests")
            .field("outstanding", &self.len())
            .finish()
    }
}

/// The reply to one registered request.
///
/// Resolves to an error if the waiter is failed or replaced. Dropping it
/// before it resolves removes the registration.
#[must_use = "dropping the reply withdraws the request"]
pub struct PendingReply<'a> {
    table: &'a PendingRequests,
    seq_num: u32,
    token: u64,
    rx: oneshot::Receiver<Reply>,
}

impl PendingReply<'_> {
    /// Sequence number this reply answers.
    pub fn seq_num(&self) -> u32 {
        self.seq_num
    }
}

impl Future for PendingReply<'_> {
    type Output = Result<Reply, RecvError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx)
    }
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        self.table.withdraw(self.seq_num, self.token);
    }
}

impl std::fmt::Debug for PendingReply<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply")
            .field("seq_num", &self.seq_num)
            .finish()
    }
}
