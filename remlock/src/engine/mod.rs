//! Readers-writer lock engine of the context holding the lock.
//!
//! The engine keeps a master sequence of tasks per lock.
//! A task is either a single writer or a batch of readers.
//! Tasks run one at a time in the order they were queued:
//!
//!   * every write request queues one task,
//!   * a read request joins the open read batch, if there is one,
//!     or opens a new batch and queues it as a task,
//!   * a write request closes the open read batch, thus readers
//!     requested after a writer always run after that writer.
//!
//! All readers of a batch start together once the batch becomes the active task,
//! limited by the configured read concurrency.
//! The batch completes when all its readers have released their locks.
//!
//! Requests enter the sequence at the moment [Engine::read_lock] or [Engine::write_lock]
//! is called, not when the returned future is first polled.
//!
//! A request can be cancelled by its [CancellationToken] until it is granted.
//! Cancelling afterwards has no effect, the holder must release the lock.

use futures::{
    future::{self, BoxFuture},
    FutureExt,
};
use std::{
    fmt,
    sync::{Arc, Mutex},
};
use tokio::sync::{oneshot, watch};

mod sequence;
mod ticket;

use sequence::{IdleListener, Sequence, Waiter};
use ticket::Ticket;

use crate::{error::LockError, msg::LockKind, release::ReleaseToken, signal::CancellationToken};

/// Slot of the master sequence held by a granted lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Slot {
    /// The writer.
    Write,
    /// A reader of the specified batch.
    Read(u64),
}

/// Snapshot of the state of a lock queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStatus {
    /// Number of queued tasks (writers and read batches) that have not started yet.
    pub size: usize,
    /// Number of running tasks, either zero or one.
    pub pending: usize,
    /// Number of read locks currently held.
    pub readers: usize,
    /// Whether the write lock is currently held.
    pub writer: bool,
}

impl QueueStatus {
    /// True, if no lock is held and no request is queued.
    pub fn is_idle(&self) -> bool {
        self.size == 0 && self.pending == 0
    }
}

/// State shared between an engine, its pending requests and granted locks.
pub(crate) struct Shared {
    seq: Mutex<Sequence>,
    idle_tx: watch::Sender<bool>,
}

impl Shared {
    /// Modifies the sequence and grants what became available.
    fn update<R>(self: &Arc<Self>, f: impl FnOnce(&mut Sequence) -> R) -> R {
        let (res, listeners) = {
            let mut seq = self.seq.lock().unwrap();
            let res = f(&mut *seq);
            let listeners = seq.advance(self);
            (res, listeners)
        };

        for listener in listeners {
            listener();
        }

        res
    }

    /// Returns a granted slot to the sequence.
    pub(crate) fn complete(self: &Arc<Self>, slot: Slot) {
        log::trace!("releasing {:?}", slot);
        self.update(|seq| seq.complete(slot))
    }

    /// Removes a request that has not been granted yet.
    fn withdraw(self: &Arc<Self>, ticket: u64) -> bool {
        self.update(|seq| seq.withdraw(ticket))
    }
}

/// Readers-writer lock engine.
///
/// Clones share the same lock state.
///
/// See [module-level documentation](self) for details.
#[derive(Clone)]
pub struct Engine(Arc<Shared>);

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Engine").field("status", &self.status()).finish()
    }
}

impl Engine {
    /// Creates a new engine allowing at most `concurrency` simultaneous readers.
    ///
    /// `None` does not limit the number of readers.
    ///
    /// # Panics
    /// Panics if `concurrency` is zero.
    pub fn new(concurrency: Option<usize>) -> Self {
        if concurrency == Some(0) {
            panic!("read concurrency must not be zero");
        }

        let (idle_tx, _) = watch::channel(true);
        Self(Arc::new(Shared { seq: Mutex::new(Sequence::new(concurrency)), idle_tx }))
    }

    /// Requests a read lock.
    ///
    /// The request is queued immediately.
    pub fn read_lock(&self, cancel: Option<&CancellationToken>) -> BoxFuture<'static, Result<ReleaseToken, LockError>> {
        self.lock(LockKind::Read, cancel)
    }

    /// Requests a write lock.
    ///
    /// The request is queued immediately.
    pub fn write_lock(&self, cancel: Option<&CancellationToken>) -> BoxFuture<'static, Result<ReleaseToken, LockError>> {
        self.lock(LockKind::Write, cancel)
    }

    /// Requests a lock of the specified kind.
    ///
    /// The request is queued immediately.
    /// Fails with [LockError::Cancelled] without queueing if `cancel` is already cancelled.
    pub fn lock(
        &self, kind: LockKind, cancel: Option<&CancellationToken>,
    ) -> BoxFuture<'static, Result<ReleaseToken, LockError>> {
        if crate::signal::is_cancelled(cancel) {
            return future::ready(Err(LockError::Cancelled)).boxed();
        }

        let (tx, rx) = oneshot::channel();
        let cancel = cancel.cloned();
        let id = self.0.update(|seq| {
            let id = seq.ticket();
            let waiter = Waiter::new(id, tx, cancel.clone());
            match kind {
                LockKind::Read => seq.push_read(waiter),
                LockKind::Write => seq.push_write(waiter),
            }
            id
        });
        log::trace!("queued {} lock ticket {}", kind, id);

        Ticket { shared: self.0.clone(), id, rx, cancel, done: false }.wait().boxed()
    }

    /// Current state of the lock queue.
    pub fn status(&self) -> QueueStatus {
        self.0.seq.lock().unwrap().status()
    }

    /// Calls the listener once, the next time the lock becomes idle.
    ///
    /// The lock becomes idle when the last held lock is released and no request is queued.
    pub fn on_idle(&self, listener: impl FnOnce() + Send + 'static) {
        let listener: IdleListener = Box::new(listener);
        self.0.seq.lock().unwrap().on_idle(listener);
    }

    /// Waits until no lock is held and no request is queued.
    ///
    /// Returns immediately if the lock is idle.
    pub async fn idle(&self) {
        let mut idle_rx = self.0.idle_tx.subscribe();
        loop {
            let idle = *idle_rx.borrow_and_update();
            if idle {
                return;
            }
            if idle_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// True, if both engines share the same lock state.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
