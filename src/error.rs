//! Errors surfaced by the relationship API.

use crate::store::StoreError;
use std::fmt;

#[derive(Debug)]
pub enum LinkError {
    /// The store rejected or failed an operation
    Store(StoreError),
    /// An entity without an ID was used where a persisted one is required
    Unsaved { entity: &'static str },
    /// Misuse of an otherwise valid handle
    InvalidOperation(String),
    /// A type or property name cannot be encoded into a collection name
    InvalidName(String),
    /// A cancellation token was supplied without a session
    CancellationUnsupported,
    /// The cancellation token fired before the operation finished
    Cancelled,
    /// Entity (de)serialization failed
    Serialization(String),
    /// A fan-out task ended without reporting a result
    FanOut(String),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Store(e) => write!(f, "{}", e),
            LinkError::Unsaved { entity } => write!(
                f,
                "Invalid operation: {} has no ID; save it before using it in a relationship",
                entity
            ),
            LinkError::InvalidOperation(s) => write!(f, "Invalid operation: {}", s),
            LinkError::InvalidName(s) => write!(f, "Invalid relationship name: {}", s),
            LinkError::CancellationUnsupported => write!(
                f,
                "Cancellation is only supported within a session; pass a session or drop the token"
            ),
            LinkError::Cancelled => write!(f, "Operation cancelled"),
            LinkError::Serialization(s) => write!(f, "Serialization error: {}", s),
            LinkError::FanOut(s) => write!(f, "Fan-out task failed: {}", s),
        }
    }
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LinkError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for LinkError {
    fn from(err: StoreError) -> Self {
        LinkError::Store(err)
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::Serialization(err.to_string())
    }
}

impl LinkError {
    /// Precondition violations: never worth retrying
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            LinkError::Unsaved { .. }
                | LinkError::InvalidOperation(_)
                | LinkError::InvalidName(_)
                | LinkError::CancellationUnsupported
        )
    }
}
