use std::sync::Arc;
use tokio::sync::oneshot;

use super::Shared;
use crate::{error::LockError, release::ReleaseToken, signal::CancellationToken};

/// A queued lock request of the local engine.
///
/// Dropping the ticket before it resolved withdraws the request.
pub(super) struct Ticket {
    pub shared: Arc<Shared>,
    pub id: u64,
    pub rx: oneshot::Receiver<ReleaseToken>,
    pub cancel: Option<CancellationToken>,
    pub done: bool,
}

impl Ticket {
    /// Waits until the lock is granted or the request is cancelled.
    pub async fn wait(mut self) -> Result<ReleaseToken, LockError> {
        let granted = match self.cancel.take() {
            Some(cancel) => tokio::select! {
                biased;
                res = &mut self.rx => Some(res),
                () = cancel.cancelled() => None,
            },
            None => Some((&mut self.rx).await),
        };

        let res = match granted {
            Some(res) => res,
            None if self.shared.withdraw(self.id) => {
                log::trace!("lock ticket {} cancelled while queued", self.id);
                self.done = true;
                return Err(LockError::Cancelled);
            }
            // Granted before the cancellation was observed.
            None => (&mut self.rx).await,
        };
        self.done = true;

        // The sender is only dropped without a grant when the cancellation reached the engine first.
        res.map_err(|_| LockError::Cancelled)
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if !self.done {
            self.shared.withdraw(self.id);
        }
    }
}
