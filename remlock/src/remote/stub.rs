use futures::{
    future::{self, BoxFuture},
    FutureExt,
};
use tokio::sync::oneshot;

use super::{correlator::Reply, Link};
use crate::{
    error::LockError,
    msg::{LockKind, RequestId, ToAuthority},
    release::ReleaseToken,
    signal::CancellationToken,
};

/// Lock whose state is held by the authority.
pub(crate) struct Stub {
    name: String,
    link: Link,
}

impl Stub {
    pub fn new(name: String, link: Link) -> Self {
        Self { name, link }
    }

    /// Sends a lock request to the authority.
    pub fn lock(
        &self, kind: LockKind, cancel: Option<&CancellationToken>,
    ) -> BoxFuture<'static, Result<ReleaseToken, LockError>> {
        if crate::signal::is_cancelled(cancel) {
            return future::ready(Err(LockError::Cancelled)).boxed();
        }

        let (id, rx) = match self.link.correlator().register() {
            Ok(registered) => registered,
            Err(err) => return future::ready(Err(err)).boxed(),
        };

        if let Err(err) = self.link.send(ToAuthority::Request { id, name: self.name.clone(), kind }) {
            self.link.correlator().forget(id);
            return future::ready(Err(err)).boxed();
        }

        let pending = Pending {
            link: self.link.clone(),
            name: self.name.clone(),
            id,
            rx,
            cancel: cancel.cloned(),
            aborted: false,
            settled: false,
        };
        pending.wait().boxed()
    }

    /// Asks the authority to finalize the lock.
    pub fn finalize(&self) {
        if let Err(err) = self.link.send(ToAuthority::Finalize { name: self.name.clone() }) {
            log::debug!("cannot finalize lock {}: {}", &self.name, err);
        }
    }
}

/// A request waiting for the reply of the authority.
///
/// Dropping it before the reply arrived aborts the request.
struct Pending {
    link: Link,
    name: String,
    id: RequestId,
    rx: oneshot::Receiver<Reply>,
    cancel: Option<CancellationToken>,
    aborted: bool,
    settled: bool,
}

impl Pending {
    fn abort(&mut self) {
        if !self.aborted {
            self.aborted = true;
            let _ = self.link.send(ToAuthority::Abort { id: self.id, name: self.name.clone() });
        }
    }

    fn release(&self) {
        let _ = self.link.send(ToAuthority::Release { id: self.id, name: self.name.clone() });
    }

    /// Waits for the reply.
    ///
    /// A cancelled request still waits for the authority, which replies either way.
    async fn wait(mut self) -> Result<ReleaseToken, LockError> {
        let reply = match self.cancel.take() {
            Some(cancel) => tokio::select! {
                biased;
                reply = &mut self.rx => reply,
                () = cancel.cancelled() => {
                    log::trace!("aborting request {} for lock {}", self.id, &self.name);
                    self.abort();
                    (&mut self.rx).await
                }
            },
            None => (&mut self.rx).await,
        };
        self.settled = true;

        match reply {
            Ok(Reply::Granted) if self.aborted => {
                log::debug!("releasing lock {} granted after abort of request {}", &self.name, self.id);
                self.release();
                Err(LockError::Cancelled)
            }
            Ok(Reply::Granted) => Ok(ReleaseToken::remote(self.link.clone(), self.id, self.name.clone())),
            Ok(Reply::Failed(info)) => Err(info.into()),
            Err(_) => Err(LockError::Disconnected),
        }
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        if self.link.correlator().abandon(self.id) {
            self.abort();
        } else if let Ok(Reply::Granted) = self.rx.try_recv() {
            self.release();
        }
    }
}
