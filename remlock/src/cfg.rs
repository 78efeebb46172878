//! Lock options.

/// Name of a lock when none is specified.
pub const DEFAULT_NAME: &str = "lock";

/// Options for obtaining a lock from a [Registry](crate::Registry).
///
/// Options only take effect when the lock is created.
/// A lookup of an existing lock returns it unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Options {
    /// Name of the lock.
    ///
    /// Locks with different names are fully independent.
    /// By default this is `lock`.
    pub name: String,
    /// Maximum number of read locks held at the same time.
    ///
    /// Only enforced by the authority, i.e. ignored for locks relayed to it.
    /// By default this is unbounded.
    /// This must not be zero.
    pub concurrency: Option<usize>,
    /// Keep the lock state local to this context, even if it is a subordinate.
    ///
    /// By default this is false.
    pub single_process: bool,
    /// Remove the lock from the registry the first time it becomes idle.
    ///
    /// Only applies to locks held by this context.
    /// By default this is false.
    pub auto_finalize: bool,
    #[doc(hidden)]
    pub _non_exhaustive: (),
}

impl Default for Options {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            concurrency: None,
            single_process: false,
            auto_finalize: false,
            _non_exhaustive: (),
        }
    }
}

impl Options {
    /// Default options for the lock with the specified name.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// Checks the options.
    ///
    /// # Panics
    /// Panics if the options are invalid.
    pub(crate) fn check(&self) {
        if self.concurrency == Some(0) {
            panic!("read concurrency must not be zero");
        }
    }
}
