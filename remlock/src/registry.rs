//! Registry of named locks.
//!
//! Each context keeps one registry, holding at most one lock per name.
//! The registry is told once whether its context is the authority,
//! which holds the state of all locks, or a subordinate, which relays
//! its requests to the authority over a [Link].

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, Weak},
};

use crate::{
    cfg::Options,
    engine::Engine,
    handle::{Backend, LockHandle},
    remote::{Link, Stub},
};

/// Role of a context in the lock protocol.
#[derive(Clone, Debug)]
pub enum Role {
    /// Holds the state of all locks and serves subordinates.
    Authority,
    /// Relays lock requests to the authority over the link.
    Subordinate(Link),
}

struct Inner {
    role: Role,
    locks: Mutex<HashMap<String, LockHandle>>,
}

/// Process-scoped registry of named locks.
///
/// Clones share the same locks.
///
/// See [module-level documentation](self) for details.
#[derive(Clone)]
pub struct Registry(Arc<Inner>);

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Registry").field("role", &self.0.role).field("locks", &self.len()).finish()
    }
}

impl Registry {
    /// Creates an empty registry for a context with the specified role.
    pub fn new(role: Role) -> Self {
        Self(Arc::new(Inner { role, locks: Mutex::new(HashMap::new()) }))
    }

    /// Creates an empty registry for the authority.
    pub fn authority() -> Self {
        Self::new(Role::Authority)
    }

    /// Creates an empty registry for a subordinate connected to the authority by `link`.
    pub fn subordinate(link: Link) -> Self {
        Self::new(Role::Subordinate(link))
    }

    /// Role of this context.
    pub fn role(&self) -> &Role {
        &self.0.role
    }

    /// True, if this context is the authority.
    pub fn is_authority(&self) -> bool {
        matches!(self.0.role, Role::Authority)
    }

    /// Returns the lock named in the options, creating it if necessary.
    ///
    /// # Panics
    /// Panics if the options are invalid.
    pub fn acquire(&self, opts: &Options) -> LockHandle {
        self.get(&opts.name, opts)
    }

    /// Returns the lock with the specified name, creating it if necessary.
    ///
    /// The options only take effect when the lock is created.
    /// A lock is held by this context if it is the authority or
    /// [single_process](Options::single_process) is set, otherwise it is relayed.
    ///
    /// # Panics
    /// Panics if the options are invalid.
    pub fn get(&self, name: &str, opts: &Options) -> LockHandle {
        opts.check();

        let mut locks = self.0.locks.lock().unwrap();
        if let Some(handle) = locks.get(name) {
            return handle.clone();
        }

        let backend = match &self.0.role {
            Role::Subordinate(link) if !opts.single_process => Backend::Remote(Stub::new(name.to_string(), link.clone())),
            _ => Backend::Local(Engine::new(opts.concurrency)),
        };
        let handle = LockHandle::new(name.to_string(), backend, WeakRegistry(Arc::downgrade(&self.0)));
        log::debug!("created lock {:?}", &handle);

        if opts.auto_finalize {
            match handle.engine() {
                Some(engine) => {
                    let registry = WeakRegistry(Arc::downgrade(&self.0));
                    let weak = handle.downgrade();
                    engine.on_idle(move || {
                        if let (Some(registry), Some(handle)) = (registry.upgrade(), weak.upgrade()) {
                            log::debug!("auto finalizing lock {}", handle.name());
                            registry.remove(&handle);
                        }
                    });
                }
                None => log::debug!("auto finalize has no effect on relayed lock {}", name),
            }
        }

        locks.insert(name.to_string(), handle.clone());
        handle
    }

    /// Returns the lock with the specified name, if it exists.
    pub fn lookup(&self, name: &str) -> Option<LockHandle> {
        self.0.locks.lock().unwrap().get(name).cloned()
    }

    /// Removes the lock with the specified name.
    ///
    /// Held locks stay valid, but the next lookup of the name creates a new lock.
    /// Returns false if no such lock exists.
    pub fn finalize(&self, name: &str) -> bool {
        let removed = self.0.locks.lock().unwrap().remove(name);
        match removed {
            Some(handle) => {
                log::debug!("finalized lock {}", handle.name());
                true
            }
            None => false,
        }
    }

    /// Removes the lock, if it is still registered under its name.
    pub(crate) fn remove(&self, handle: &LockHandle) -> bool {
        let removed = {
            let mut locks = self.0.locks.lock().unwrap();
            match locks.get(handle.name()) {
                Some(registered) if registered.ptr_eq(handle) => locks.remove(handle.name()),
                _ => None,
            }
        };
        removed.is_some()
    }

    /// Names of all registered locks.
    pub fn names(&self) -> Vec<String> {
        self.0.locks.lock().unwrap().keys().cloned().collect()
    }

    /// Number of registered locks.
    pub fn len(&self) -> usize {
        self.0.locks.lock().unwrap().len()
    }

    /// True, if no lock is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registry reference that does not keep the registry alive.
pub(crate) struct WeakRegistry(Weak<Inner>);

impl WeakRegistry {
    pub fn upgrade(&self) -> Option<Registry> {
        self.0.upgrade().map(Registry)
    }
}
