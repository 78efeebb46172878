use std::{fmt, sync::Arc};

use crate::{
    engine::{Shared, Slot},
    msg::{RequestId, ToAuthority},
    remote::Link,
};

/// Where a granted lock must be returned to.
enum Holder {
    /// Slot of the engine held by this context.
    Local { shared: Arc<Shared>, slot: Slot },
    /// Lock granted by the authority.
    Remote { link: Link, id: RequestId, name: String },
}

/// Capability returned by a successful lock acquisition.
///
/// The lock is held until [release](Self::release) is called or the token is dropped.
/// Releasing more than once has no further effect.
#[must_use = "the lock is released immediately if the token is dropped"]
pub struct ReleaseToken(Option<Holder>);

impl fmt::Debug for ReleaseToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.0 {
            Some(Holder::Local { slot, .. }) => f.debug_tuple("ReleaseToken").field(slot).finish(),
            Some(Holder::Remote { id, name, .. }) => {
                f.debug_struct("ReleaseToken").field("id", id).field("name", name).finish()
            }
            None => write!(f, "ReleaseToken(released)"),
        }
    }
}

impl ReleaseToken {
    pub(crate) fn local(shared: Arc<Shared>, slot: Slot) -> Self {
        Self(Some(Holder::Local { shared, slot }))
    }

    pub(crate) fn remote(link: Link, id: RequestId, name: String) -> Self {
        Self(Some(Holder::Remote { link, id, name }))
    }

    /// Releases the lock.
    pub fn release(&mut self) {
        match self.0.take() {
            Some(Holder::Local { shared, slot }) => shared.complete(slot),
            Some(Holder::Remote { link, id, name }) => {
                log::trace!("releasing lock {} for request {}", &name, id);
                // A closed link means the authority has already dropped the lock.
                let _ = link.send(ToAuthority::Release { id, name });
            }
            None => (),
        }
    }

    /// True, if the lock has been released.
    pub fn is_released(&self) -> bool {
        self.0.is_none()
    }

    /// Discards the token without releasing.
    ///
    /// Used when the grant could not be delivered and the caller accounts for the slot itself.
    pub(crate) fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for ReleaseToken {
    fn drop(&mut self) {
        self.release();
    }
}
