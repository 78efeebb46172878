use futures::future::BoxFuture;
use std::{
    fmt,
    sync::{Arc, Weak},
};

use crate::{
    engine::{Engine, QueueStatus},
    error::LockError,
    msg::LockKind,
    registry::WeakRegistry,
    release::ReleaseToken,
    remote::Stub,
    signal::CancellationToken,
};

/// Where the state of a lock lives.
pub(crate) enum Backend {
    /// Held by this context.
    Local(Engine),
    /// Held by the authority.
    Remote(Stub),
}

struct Inner {
    name: String,
    backend: Backend,
    registry: WeakRegistry,
}

/// A named readers-writer lock obtained from a [Registry](crate::Registry).
///
/// Clones refer to the same lock.
/// Two handles compare equal if they refer to the same lock.
///
/// Many read locks can be held at the same time.
/// A write lock is exclusive: while it is held, no other read or write lock is held.
/// Requests are served in the order they were made, except that read requests
/// made while a batch of readers is queued or running join that batch,
/// unless a write request has been made in between.
#[derive(Clone)]
pub struct LockHandle(Arc<Inner>);

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LockHandle").field("name", &self.0.name).field("relayed", &self.is_relayed()).finish()
    }
}

impl PartialEq for LockHandle {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for LockHandle {}

impl LockHandle {
    pub(crate) fn new(name: String, backend: Backend, registry: WeakRegistry) -> Self {
        Self(Arc::new(Inner { name, backend, registry }))
    }

    /// Name of the lock.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Requests a read lock.
    ///
    /// The request is queued immediately.
    /// It can be cancelled by `cancel` until the lock is granted.
    pub fn read_lock(&self, cancel: Option<&CancellationToken>) -> BoxFuture<'static, Result<ReleaseToken, LockError>> {
        self.lock(LockKind::Read, cancel)
    }

    /// Requests a write lock.
    ///
    /// The request is queued immediately.
    /// It can be cancelled by `cancel` until the lock is granted.
    pub fn write_lock(&self, cancel: Option<&CancellationToken>) -> BoxFuture<'static, Result<ReleaseToken, LockError>> {
        self.lock(LockKind::Write, cancel)
    }

    /// Requests a lock of the specified kind.
    pub fn lock(
        &self, kind: LockKind, cancel: Option<&CancellationToken>,
    ) -> BoxFuture<'static, Result<ReleaseToken, LockError>> {
        match &self.0.backend {
            Backend::Local(engine) => engine.lock(kind, cancel),
            Backend::Remote(stub) => stub.lock(kind, cancel),
        }
    }

    /// Removes the lock from its registry.
    ///
    /// Held locks stay valid, but the next lookup of the name creates a new lock.
    /// A relayed lock is also finalized at the authority.
    pub fn finalize(&self) {
        if let Some(registry) = self.0.registry.upgrade() {
            registry.remove(self);
        }

        if let Backend::Remote(stub) = &self.0.backend {
            stub.finalize();
        }
    }

    /// State of the lock queue, if the lock is held by this context.
    pub fn queue(&self) -> Option<QueueStatus> {
        self.engine().map(|engine| engine.status())
    }

    /// The engine, if the lock is held by this context.
    pub fn engine(&self) -> Option<&Engine> {
        match &self.0.backend {
            Backend::Local(engine) => Some(engine),
            Backend::Remote(_) => None,
        }
    }

    /// True, if requests are relayed to the authority.
    pub fn is_relayed(&self) -> bool {
        matches!(&self.0.backend, Backend::Remote(_))
    }

    /// Waits until no lock is held and no request is queued.
    ///
    /// Returns immediately for a relayed lock.
    pub async fn idle(&self) {
        if let Some(engine) = self.engine() {
            engine.idle().await;
        }
    }

    /// True, if both handles refer to the same lock.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn downgrade(&self) -> WeakLockHandle {
        WeakLockHandle(Arc::downgrade(&self.0))
    }
}

/// Lock handle that does not keep the lock alive.
pub(crate) struct WeakLockHandle(Weak<Inner>);

impl WeakLockHandle {
    pub fn upgrade(&self) -> Option<LockHandle> {
        self.0.upgrade().map(LockHandle)
    }
}
