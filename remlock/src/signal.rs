//! Cancellation signals.
//!
//! Lock requests are cancelled through a [CancellationToken].
//! A timeout is nothing more than a token that is cancelled by a timer.

use std::time::Duration;
pub use tokio_util::sync::CancellationToken;

/// Returns a token that is cancelled once the specified duration has elapsed.
///
/// The timer keeps running until it fires or the token is cancelled,
/// even if all clones of the token have been dropped.
///
/// # Panics
/// Panics if called outside of a Tokio runtime.
pub fn timeout(duration: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = tokio::time::sleep(duration) => {
                log::trace!("timeout of {:?} elapsed", duration);
                timer.cancel();
            }
            () = timer.cancelled() => (),
        }
    });
    token
}

pub(crate) fn is_cancelled(cancel: Option<&CancellationToken>) -> bool {
    cancel.map(|cancel| cancel.is_cancelled()).unwrap_or_default()
}
