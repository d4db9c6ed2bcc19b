use thiserror::Error;

use crate::{Key, Value};

/// The common error type used by this crate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    /// A conditional put found a value other than the one it expected. The
    /// value actually present (if any) is reported so that callers can decide
    /// how to proceed.
    #[error("Condition failed for key {key:?}")]
    ConditionFailed {
        /// The key whose condition did not hold
        key: Key,
        /// The value found at the key, or `None` if the key was absent
        actual: Option<Value>,
    },

    /// The transaction observed state that was changed concurrently and must
    /// be run again from the start
    #[error("Transaction must be retried: {0}")]
    TransactionRetry(String),

    /// A transaction was used after it was committed or rolled back
    #[error("Transaction has already finished")]
    TransactionFinished,

    /// A response did not have the shape its request called for
    #[error("Unexpected result for request {index}: {reason}")]
    UnexpectedResponse {
        /// Position of the request within its batch
        index: usize,
        /// What was wrong with the result
        reason: String,
    },

    /// An error that occurs when working with a storage backend
    #[error("KV backend error: {0}")]
    Backend(String),
}

impl KvError {
    /// True if running the enclosing transaction again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KvError::TransactionRetry(_))
    }

    /// True if this is a [KvError::ConditionFailed].
    pub fn is_condition_failed(&self) -> bool {
        matches!(self, KvError::ConditionFailed { .. })
    }
}
