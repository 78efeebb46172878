use std::{
    collections::{HashMap, VecDeque},
    mem,
    sync::Arc,
};
use tokio::sync::oneshot;

use super::{QueueStatus, Shared, Slot};
use crate::{release::ReleaseToken, signal::CancellationToken};

/// Listener invoked when the master sequence becomes idle.
pub(crate) type IdleListener = Box<dyn FnOnce() + Send>;

/// A caller waiting for its lock to be granted.
pub(super) struct Waiter {
    ticket: u64,
    tx: oneshot::Sender<ReleaseToken>,
    cancel: Option<CancellationToken>,
}

impl Waiter {
    pub fn new(ticket: u64, tx: oneshot::Sender<ReleaseToken>, cancel: Option<CancellationToken>) -> Self {
        Self { ticket, tx, cancel }
    }

    fn is_cancelled(&self) -> bool {
        crate::signal::is_cancelled(self.cancel.as_ref())
    }

    /// Hands out the lock.
    ///
    /// Returns false if the waiter is gone or was cancelled before this point,
    /// in which case the slot was never taken.
    fn grant(self, shared: &Arc<Shared>, slot: Slot) -> bool {
        if self.is_cancelled() {
            return false;
        }

        match self.tx.send(ReleaseToken::local(shared.clone(), slot)) {
            Ok(()) => true,
            Err(token) => {
                token.disarm();
                false
            }
        }
    }
}

/// A task of the master sequence.
enum Task {
    /// Run a single writer.
    Write(Waiter),
    /// Run a read batch to completion.
    Read(u64),
}

/// Readers admitted together.
#[derive(Default)]
struct Batch {
    waiting: VecDeque<Waiter>,
    running: usize,
}

/// Per-lock scheduling state.
///
/// Tasks of the master sequence run one at a time in the order they were queued.
pub(super) struct Sequence {
    concurrency: usize,
    tasks: VecDeque<Task>,
    active: Option<Slot>,
    batches: HashMap<u64, Batch>,
    open_batch: Option<u64>,
    next_id: u64,
    busy: bool,
    idle_listeners: Vec<IdleListener>,
}

impl Sequence {
    pub fn new(concurrency: Option<usize>) -> Self {
        Self {
            concurrency: concurrency.unwrap_or(usize::MAX),
            tasks: VecDeque::new(),
            active: None,
            batches: HashMap::new(),
            open_batch: None,
            next_id: 0,
            busy: false,
            idle_listeners: Vec::new(),
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn ticket(&mut self) -> u64 {
        self.next_id()
    }

    /// Queues a writer.
    ///
    /// Closes the open read batch, so that later readers queue behind this writer.
    pub fn push_write(&mut self, waiter: Waiter) {
        self.open_batch = None;
        self.tasks.push_back(Task::Write(waiter));
    }

    /// Adds a reader to the open read batch or opens a new one.
    pub fn push_read(&mut self, waiter: Waiter) {
        if let Some(batch) = self.open_batch.and_then(|id| self.batches.get_mut(&id)) {
            batch.waiting.push_back(waiter);
            return;
        }

        let id = self.next_id();
        let mut batch = Batch::default();
        batch.waiting.push_back(waiter);
        self.batches.insert(id, batch);
        self.open_batch = Some(id);
        self.tasks.push_back(Task::Read(id));
    }

    /// Removes a waiter that has not been granted yet.
    ///
    /// Returns false if no such waiter is queued.
    pub fn withdraw(&mut self, ticket: u64) -> bool {
        let pos = self.tasks.iter().position(|task| matches!(task, Task::Write(waiter) if waiter.ticket == ticket));
        if let Some(pos) = pos {
            self.tasks.remove(pos);
            return true;
        }

        for batch in self.batches.values_mut() {
            if let Some(pos) = batch.waiting.iter().position(|waiter| waiter.ticket == ticket) {
                batch.waiting.remove(pos);
                return true;
            }
        }

        false
    }

    /// Returns a granted slot.
    pub fn complete(&mut self, slot: Slot) {
        match slot {
            Slot::Write => {
                if self.active == Some(Slot::Write) {
                    self.active = None;
                }
            }
            Slot::Read(id) => {
                if let Some(batch) = self.batches.get_mut(&id) {
                    batch.running = batch.running.saturating_sub(1);
                }
            }
        }
    }

    /// Grants locks as far as the master sequence allows.
    ///
    /// Returns the idle listeners to invoke once the state is unlocked.
    pub fn advance(&mut self, shared: &Arc<Shared>) -> Vec<IdleListener> {
        loop {
            match self.active {
                None => match self.tasks.pop_front() {
                    Some(Task::Write(waiter)) => {
                        let ticket = waiter.ticket;
                        self.active = Some(Slot::Write);
                        if waiter.grant(shared, Slot::Write) {
                            log::trace!("granted write lock to ticket {}", ticket);
                            break;
                        }
                        self.active = None;
                    }
                    Some(Task::Read(id)) => {
                        log::trace!("starting read batch {}", id);
                        self.active = Some(Slot::Read(id));
                    }
                    None => break,
                },
                Some(Slot::Write) => break,
                Some(Slot::Read(id)) => {
                    let Some(batch) = self.batches.get_mut(&id) else {
                        self.active = None;
                        continue;
                    };

                    while batch.running < self.concurrency {
                        let Some(waiter) = batch.waiting.pop_front() else { break };
                        if waiter.grant(shared, Slot::Read(id)) {
                            batch.running += 1;
                        }
                    }

                    if batch.running > 0 || !batch.waiting.is_empty() {
                        break;
                    }

                    log::trace!("read batch {} done", id);
                    self.batches.remove(&id);
                    if self.open_batch == Some(id) {
                        self.open_batch = None;
                    }
                    self.active = None;
                }
            }
        }

        let idle = self.active.is_none() && self.tasks.is_empty();
        if idle && self.busy {
            self.busy = false;
            shared.idle_tx.send_replace(true);
            mem::take(&mut self.idle_listeners)
        } else {
            if !idle && !self.busy {
                self.busy = true;
                shared.idle_tx.send_replace(false);
            }
            Vec::new()
        }
    }

    pub fn on_idle(&mut self, listener: IdleListener) {
        self.idle_listeners.push(listener);
    }

    pub fn status(&self) -> QueueStatus {
        let size = self
            .tasks
            .iter()
            .filter(|task| match task {
                Task::Write(waiter) => !waiter.is_cancelled(),
                Task::Read(_) => true,
            })
            .count();
        let readers = match self.active {
            Some(Slot::Read(id)) => self.batches.get(&id).map(|batch| batch.running).unwrap_or_default(),
            _ => 0,
        };

        QueueStatus {
            size,
            pending: usize::from(self.active.is_some()),
            readers,
            writer: self.active == Some(Slot::Write),
        }
    }
}
