//! Authority side of the lock protocol.
//!
//! The relay receives the messages of all subordinates and drives their requests
//! through the locks of the authority's [Registry].
//! Requests for a lock the authority has not created are dropped.
//!
//! Each message is handled by [Relay::dispatch], which never blocks.
//! Requests enter the lock queue in the order they are dispatched,
//! thus requests of different subordinates are ordered by their arrival.
//!
//! A granted lock is held on behalf of the subordinate until it sends a release message
//! or disconnects.

use futures::{Sink, Stream, StreamExt};
use std::{
    collections::{hash_map::Entry, HashMap},
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    error::ErrorInfo,
    msg::{LockKind, RequestId, ToAuthority, ToSubordinate},
    signal::CancellationToken,
    transport, Registry,
};

/// A subordinate connected to the relay.
#[derive(Clone)]
pub struct Peer {
    id: u64,
    tx: mpsc::UnboundedSender<ToSubordinate>,
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Peer").field("id", &self.id).finish()
    }
}

impl Peer {
    /// Id of the peer, unique within its relay.
    pub fn id(&self) -> u64 {
        self.id
    }

    fn send(&self, msg: ToSubordinate) {
        log::trace!("peer {} <== {:?}", self.id, &msg);
        if self.tx.send(msg).is_err() {
            log::debug!("peer {} is gone", self.id);
        }
    }
}

/// State of a request received from a peer.
enum Request {
    /// Waiting in the lock queue.
    Queued(CancellationToken),
    /// Granted, waiting for the release message.
    Granted(oneshot::Sender<()>),
}

struct Inner {
    registry: Registry,
    requests: Mutex<HashMap<(u64, RequestId), Request>>,
    next_peer: AtomicU64,
}

/// Relays lock requests of subordinates to the locks of the authority.
///
/// Clones share the same state.
///
/// See [module-level documentation](self) for details.
#[derive(Clone)]
pub struct Relay(Arc<Inner>);

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Relay").field("outstanding", &self.outstanding()).finish()
    }
}

impl Relay {
    /// Creates a relay serving the locks of the specified registry.
    pub fn new(registry: Registry) -> Self {
        if !registry.is_authority() {
            log::warn!("relaying lock requests through a subordinate registry");
        }

        Self(Arc::new(Inner { registry, requests: Mutex::new(HashMap::new()), next_peer: AtomicU64::new(0) }))
    }

    /// The registry whose locks are served.
    pub fn registry(&self) -> &Registry {
        &self.0.registry
    }

    /// Registers a peer that receives its replies through the specified sender.
    pub fn peer(&self, tx: mpsc::UnboundedSender<ToSubordinate>) -> Peer {
        let id = self.0.next_peer.fetch_add(1, Ordering::Relaxed);
        log::debug!("peer {} connected", id);
        Peer { id, tx }
    }

    /// Number of requests that are queued or granted.
    pub fn outstanding(&self) -> usize {
        self.0.requests.lock().unwrap().len()
    }

    /// Handles a message received from a peer.
    ///
    /// # Panics
    /// Panics if called outside of a Tokio runtime.
    pub fn dispatch(&self, peer: &Peer, msg: ToAuthority) {
        log::trace!("peer {} ==> {:?}", peer.id, &msg);
        match msg {
            ToAuthority::Request { id, name, kind } => self.request(peer, id, name, kind),
            ToAuthority::Abort { id, name } => self.abort(peer, id, &name),
            ToAuthority::Release { id, name } => self.release(peer, id, &name),
            ToAuthority::Finalize { name } => self.finalize(&name),
        }
    }

    fn request(&self, peer: &Peer, id: RequestId, name: String, kind: LockKind) {
        let Some(handle) = self.0.registry.lookup(&name) else {
            log::debug!("dropping {} request {} for unknown lock {}", kind, id, &name);
            return;
        };

        let key = (peer.id, id);
        let cancel = CancellationToken::new();
        match self.0.requests.lock().unwrap().entry(key) {
            Entry::Occupied(_) => {
                log::debug!("ignoring duplicate request {} from peer {}", id, peer.id);
                return;
            }
            Entry::Vacant(entry) => {
                entry.insert(Request::Queued(cancel.clone()));
            }
        }

        let acquire = handle.lock(kind, Some(&cancel));
        let relay = self.clone();
        let peer = peer.clone();
        tokio::spawn(async move {
            match acquire.await {
                Ok(mut token) => {
                    let (release_tx, release_rx) = oneshot::channel();
                    let granted = match relay.0.requests.lock().unwrap().get_mut(&key) {
                        Some(request) => {
                            *request = Request::Granted(release_tx);
                            true
                        }
                        None => false,
                    };
                    if !granted {
                        log::debug!("peer {} left before request {} was granted", peer.id, id);
                        token.release();
                        return;
                    }

                    peer.send(ToSubordinate::Grant { id, name });

                    // Also completes when the peer disconnects.
                    let _ = release_rx.await;
                    token.release();
                }
                Err(err) => {
                    relay.0.requests.lock().unwrap().remove(&key);
                    log::debug!("{} request {} for lock {} failed: {}", kind, id, &name, &err);
                    peer.send(ToSubordinate::Error { id, name, error: ErrorInfo::from(&err) });
                }
            }
        });
    }

    fn abort(&self, peer: &Peer, id: RequestId, name: &str) {
        match self.0.requests.lock().unwrap().get(&(peer.id, id)) {
            Some(Request::Queued(cancel)) => cancel.cancel(),
            Some(Request::Granted(_)) => log::debug!("ignoring abort of granted request {} for lock {}", id, name),
            None => log::debug!("ignoring abort of unknown request {} for lock {}", id, name),
        }
    }

    fn release(&self, peer: &Peer, id: RequestId, name: &str) {
        let key = (peer.id, id);
        let mut requests = self.0.requests.lock().unwrap();
        match requests.remove(&key) {
            Some(Request::Granted(release_tx)) => {
                let _ = release_tx.send(());
            }
            Some(queued) => {
                log::debug!("ignoring release of queued request {} for lock {}", id, name);
                requests.insert(key, queued);
            }
            None => log::debug!("ignoring release of unknown request {} for lock {}", id, name),
        }
    }

    fn finalize(&self, name: &str) {
        if !self.0.registry.finalize(name) {
            log::debug!("ignoring finalize of unknown lock {}", name);
        }
    }

    /// Cancels all queued requests of the peer and releases all locks it holds.
    pub fn disconnect(&self, peer: &Peer) {
        let removed: Vec<_> = {
            let mut requests = self.0.requests.lock().unwrap();
            let keys: Vec<_> = requests.keys().filter(|(peer_id, _)| *peer_id == peer.id).copied().collect();
            keys.iter().filter_map(|key| requests.remove(key)).collect()
        };
        log::debug!("peer {} disconnected with {} outstanding requests", peer.id, removed.len());

        for request in removed {
            match request {
                Request::Queued(cancel) => cancel.cancel(),
                // Dropping the sender releases the lock.
                Request::Granted(release_tx) => drop(release_tx),
            }
        }
    }

    /// Serves a subordinate connected by the specified message sink and stream.
    ///
    /// The returned task completes when the stream ends,
    /// after which the subordinate is [disconnected](Self::disconnect).
    ///
    /// # Panics
    /// Panics if called outside of a Tokio runtime.
    pub fn serve<Tx, Rx>(&self, tx: Tx, rx: Rx) -> JoinHandle<()>
    where
        Tx: Sink<ToSubordinate> + Send + 'static,
        Tx::Error: fmt::Display,
        Rx: Stream<Item = ToAuthority> + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(transport::forward(out_rx, tx));

        let peer = self.peer(out_tx);
        let relay = self.clone();
        tokio::spawn(async move {
            futures::pin_mut!(rx);
            while let Some(msg) = rx.next().await {
                relay.dispatch(&peer, msg);
            }
            relay.disconnect(&peer);
        })
    }

    /// Serves a subordinate connected over a byte stream using length-delimited JSON frames.
    ///
    /// # Panics
    /// Panics if called outside of a Tokio runtime.
    pub fn serve_io<R, W>(&self, reader: R, writer: W) -> JoinHandle<()>
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        let (tx, rx) = transport::framed::<ToSubordinate, ToAuthority, _, _>(reader, writer);
        self.serve(tx, rx)
    }
}
