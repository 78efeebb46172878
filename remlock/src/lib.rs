//! Readers-writer locks shared between processes and threads
//!
//! A lock can be acquired from multiple contexts, i.e. OS processes or threads,
//! that do not share memory.
//! One context, the *authority*, holds the state of all locks.
//! All other contexts are *subordinates* that relay their lock requests to the
//! authority over a message channel and wait for the authority to grant them.
//!
//!   * Read locks are held concurrently, optionally up to a limit.
//!   * A write lock is exclusive.
//!   * No read lock is granted while a write lock is held or requested before it.
//!   * Locks with different names are independent.
//!   * Lock requests can be cancelled or time out.
//!
//! ## Usage
//!
//! Each context creates one [Registry], telling it whether it is the authority.
//! The authority serves subordinates by a [Relay], while each subordinate connects
//! to the authority by a [Link].
//! Both work over any [Sink](futures::Sink) and [Stream](futures::Stream) of protocol
//! [messages](msg); the [transport] module provides an in-process channel
//! and a framing for byte streams such as pipes and sockets.
//!
//! Locks are obtained by name using [Registry::acquire] and requested by
//! [LockHandle::read_lock] and [LockHandle::write_lock].
//! A granted lock is held until its [ReleaseToken] is released or dropped.
//!
//! ```
//! use remlock::{signal, Options, Registry};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let registry = Registry::authority();
//! let lock = registry.acquire(&Options::named("my-lock"));
//!
//! let read1 = lock.read_lock(None).await.unwrap();
//! let read2 = lock.read_lock(None).await.unwrap();
//!
//! // A write lock is not granted while read locks are held.
//! let timeout = signal::timeout(Duration::from_millis(10));
//! assert!(lock.write_lock(Some(&timeout)).await.unwrap_err().is_cancelled());
//!
//! drop(read1);
//! drop(read2);
//!
//! let mut write = lock.write_lock(None).await.unwrap();
//! write.release();
//! # });
//! ```

pub mod cfg;
pub mod engine;
mod error;
mod handle;
pub mod msg;
pub mod registry;
pub mod relay;
mod release;
pub mod remote;
pub mod signal;
pub mod transport;

pub use cfg::Options;
pub use engine::{Engine, QueueStatus};
pub use error::{ErrorInfo, LockError, CANCELLATION_ERROR, DISCONNECTED_ERROR};
pub use handle::LockHandle;
pub use msg::LockKind;
pub use registry::{Registry, Role};
pub use relay::{Peer, Relay};
pub use release::ReleaseToken;
pub use remote::Link;
pub use signal::CancellationToken;
