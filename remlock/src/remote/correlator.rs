use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Mutex,
};
use tokio::sync::oneshot;

use crate::{
    error::{ErrorInfo, LockError},
    msg::{RequestId, ToAuthority, ToSubordinate},
};

/// Reply of the authority to a request.
#[derive(Debug)]
pub(crate) enum Reply {
    Granted,
    Failed(ErrorInfo),
}

/// State of an outstanding request.
enum Outstanding {
    /// The requester waits for the reply.
    Waiting(oneshot::Sender<Reply>),
    /// The requester gave up; a grant must be released right away.
    Abandoned,
}

#[derive(Default)]
struct Inner {
    outstanding: HashMap<RequestId, Outstanding>,
    closed: bool,
}

/// Matches replies of the authority to outstanding requests.
#[derive(Default)]
pub(crate) struct Correlator(Mutex<Inner>);

impl Correlator {
    /// Allocates an id that is unique among outstanding requests.
    pub fn register(&self) -> Result<(RequestId, oneshot::Receiver<Reply>), LockError> {
        let mut inner = self.0.lock().unwrap();
        if inner.closed {
            return Err(LockError::Disconnected);
        }

        loop {
            if let Entry::Vacant(entry) = inner.outstanding.entry(RequestId::new()) {
                let id = *entry.key();
                let (tx, rx) = oneshot::channel();
                entry.insert(Outstanding::Waiting(tx));
                return Ok((id, rx));
            }
        }
    }

    /// Forgets a request that was never sent.
    pub fn forget(&self, id: RequestId) {
        self.0.lock().unwrap().outstanding.remove(&id);
    }

    /// Marks a request as abandoned by its requester.
    ///
    /// Returns false if the reply has already been delivered.
    pub fn abandon(&self, id: RequestId) -> bool {
        let mut inner = self.0.lock().unwrap();
        match inner.outstanding.get_mut(&id) {
            Some(outstanding) => {
                *outstanding = Outstanding::Abandoned;
                true
            }
            None => false,
        }
    }

    /// Delivers a reply of the authority.
    ///
    /// Returns a release message if a grant arrived for an abandoned request.
    /// Replies to unknown requests are ignored, they occur when an abort races a grant.
    pub fn resolve(&self, msg: ToSubordinate) -> Option<ToAuthority> {
        let mut inner = self.0.lock().unwrap();

        let (id, name, reply) = match msg {
            ToSubordinate::Grant { id, name } => (id, name, Reply::Granted),
            ToSubordinate::Error { id, name, error } => (id, name, Reply::Failed(error)),
        };

        // Delivery happens under the lock, so that abandon never misses a delivered reply.
        match inner.outstanding.remove(&id) {
            Some(Outstanding::Waiting(tx)) => match tx.send(reply) {
                Ok(()) => None,
                Err(Reply::Granted) => Some(ToAuthority::Release { id, name }),
                Err(Reply::Failed(_)) => None,
            },
            Some(Outstanding::Abandoned) => match reply {
                Reply::Granted => {
                    log::debug!("releasing lock {} granted to abandoned request {}", &name, id);
                    Some(ToAuthority::Release { id, name })
                }
                Reply::Failed(_) => None,
            },
            None => {
                log::debug!("ignoring reply for unknown request {} on lock {}", id, &name);
                None
            }
        }
    }

    /// Fails all outstanding requests and rejects new ones.
    pub fn close(&self) {
        let mut inner = self.0.lock().unwrap();
        inner.closed = true;
        inner.outstanding.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.0.lock().unwrap().closed
    }
}
