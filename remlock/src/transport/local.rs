//! In-process transport.
//!
//! # Example
//!
//! ```
//! use remlock::{transport::local, Link, Options, Registry, Relay};
//!
//! # tokio_test::block_on(async {
//! let authority = Registry::authority();
//! let relay = Relay::new(authority.clone());
//! let lock = authority.acquire(&Options::default());
//!
//! let (subordinate_end, authority_end) = local::pair();
//! relay.serve(authority_end.tx, authority_end.rx);
//! let subordinate = Registry::subordinate(Link::connect(subordinate_end.tx, subordinate_end.rx));
//!
//! let mut release = subordinate.acquire(&Options::default()).write_lock(None).await.unwrap();
//! assert!(lock.queue().unwrap().writer);
//! release.release();
//! # drop(lock);
//! # });
//! ```

use futures::channel::mpsc;

use crate::msg::{ToAuthority, ToSubordinate};

/// One end of an in-process message channel.
pub struct Endpoint<Tx, Rx> {
    /// Sends messages to the other end.
    pub tx: mpsc::UnboundedSender<Tx>,
    /// Receives messages from the other end.
    pub rx: mpsc::UnboundedReceiver<Rx>,
}

/// Subordinate end of an in-process message channel.
pub type SubordinateEnd = Endpoint<ToAuthority, ToSubordinate>;

/// Authority end of an in-process message channel.
pub type AuthorityEnd = Endpoint<ToSubordinate, ToAuthority>;

/// Creates a connected pair of in-process endpoints.
pub fn pair() -> (SubordinateEnd, AuthorityEnd) {
    let (sub_tx, auth_rx) = mpsc::unbounded();
    let (auth_tx, sub_rx) = mpsc::unbounded();
    (Endpoint { tx: sub_tx, rx: sub_rx }, Endpoint { tx: auth_tx, rx: auth_rx })
}
