//! Subordinate side of the lock protocol.
//!
//! A subordinate does not hold lock state.
//! It relays each request to the authority over a [Link] and waits for
//! the authority to grant it or report an error.
//!
//! Cancelling a request sends an abort message, but the request only settles
//! once the authority has replied.
//! If the authority granted the lock before it saw the abort, the lock is
//! released right away and the request fails as cancelled.

mod correlator;
mod link;
mod stub;

pub use link::Link;
pub(crate) use stub::Stub;
