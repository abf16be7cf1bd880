use crate::MPMC::Structs::LifecycleState;

use std::fmt;
use std::sync::Arc;

/// Errors from configuring or driving the buffer lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("Invalid buffer configuration: {0}")]
    InvalidConfig(String),

    #[error("Buffer is {current}, expected it to be {expected}")]
    InvalidState {
        current: LifecycleState,
        expected: LifecycleState,
    },

    #[error("Failed to spawn processor thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// An insert that did not publish. The payload reference is handed back so the
/// caller can drop, retry or reroute it.
#[derive(thiserror::Error)]
pub enum InsertError<T> {
    /// Every slot is still held by some processor and the insert would have to wait.
    #[error("Buffer full: no slot free without waiting for processors")]
    Full(Arc<T>),

    /// The buffer is not running (not initialized yet, or shutting down).
    #[error("Buffer is not accepting inserts")]
    NotRunning(Arc<T>),
}

impl<T> InsertError<T> {
    pub fn into_inner(self) -> Arc<T> {
        match self {
            InsertError::Full(payload) | InsertError::NotRunning(payload) => payload,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, InsertError::Full(_))
    }
}

// Payload types need not be `Debug`.
impl<T> fmt::Debug for InsertError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertError::Full(_) => f.write_str("Full(..)"),
            InsertError::NotRunning(_) => f.write_str("NotRunning(..)"),
        }
    }
}

/// What a processor handler returns for an event it failed to handle.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
