//! Messages exchanged between subordinates and the lock authority.
//!
//! Every message is a self-contained record tagged by its `type` field.
//! Requests from one subordinate are told apart solely by their [RequestId].

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::ErrorInfo;

/// Identifies an outstanding lock request of a subordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new random request id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", &self.0)
    }
}

/// Kind of lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockKind {
    /// Shared read lock.
    Read,
    /// Exclusive write lock.
    Write,
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// A message from a subordinate to the authority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToAuthority {
    /// Requests a lock.
    Request {
        /// Request id.
        id: RequestId,
        /// Lock name.
        name: String,
        /// Requested lock kind.
        kind: LockKind,
    },
    /// The subordinate is no longer interested in a request that has not been granted.
    Abort {
        /// Request id.
        id: RequestId,
        /// Lock name.
        name: String,
    },
    /// The subordinate is done with a granted lock.
    Release {
        /// Request id.
        id: RequestId,
        /// Lock name.
        name: String,
    },
    /// Removes the lock from the authority's registry.
    Finalize {
        /// Lock name.
        name: String,
    },
}

impl ToAuthority {
    /// Name of the lock this message refers to.
    pub fn name(&self) -> &str {
        match self {
            Self::Request { name, .. } | Self::Abort { name, .. } | Self::Release { name, .. } => name,
            Self::Finalize { name } => name,
        }
    }
}

/// A message from the authority to a subordinate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToSubordinate {
    /// The requested lock has been granted.
    Grant {
        /// Request id.
        id: RequestId,
        /// Lock name.
        name: String,
    },
    /// The request failed and will never be granted.
    Error {
        /// Request id.
        id: RequestId,
        /// Lock name.
        name: String,
        /// Failure description.
        error: ErrorInfo,
    },
}

impl ToSubordinate {
    /// Id of the request this reply refers to.
    pub fn id(&self) -> RequestId {
        match self {
            Self::Grant { id, .. } | Self::Error { id, .. } => *id,
        }
    }
}
