use cspann_kv::KvError;
use cspann_quantize::QuantizeError;
use thiserror::Error;

use crate::{CatalogError, PartitionKey, PartitionMetadata};

/// The common error type used by this crate
#[derive(Error, Debug)]
pub enum PartitionStoreError {
    /// The partition has no metadata row (and is not the root)
    #[error("Partition {0} not found")]
    PartitionNotFound(PartitionKey),

    /// The partition's metadata did not match what the caller expected. The
    /// metadata actually stored is reported so that callers can re-plan.
    #[error("Partition metadata changed concurrently; found {actual:?}")]
    ConditionFailed {
        /// The metadata currently stored for the partition
        actual: Box<PartitionMetadata>,
    },

    /// The partition's state does not permit the requested operation
    #[error("Partition state does not permit operation: {0}")]
    StateViolation(String),

    /// A mutating operation was attempted on a store that only permits reads
    #[error("Cannot {operation} partition in read-only mode")]
    ReadOnly {
        /// The rejected operation
        operation: &'static str,
    },

    /// The arguments of an operation were inconsistent with one another
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The KV layer failed while working on a partition
    #[error("Failed to {operation} partition {partition}: {source}")]
    Kv {
        /// What the store was doing
        operation: &'static str,
        /// The partition being worked on
        partition: PartitionKey,
        /// The underlying failure
        #[source]
        source: KvError,
    },

    /// The KV layer failed while working on a batch of partitions
    #[error("Failed to {operation} {count} partitions: {source}")]
    KvBatch {
        /// What the store was doing
        operation: &'static str,
        /// How many partitions the batch addressed
        count: usize,
        /// The underlying failure
        #[source]
        source: KvError,
    },

    /// Stored bytes could not be interpreted
    #[error("Failed to interpret stored bytes: {0}")]
    Encoding(String),

    /// A vector could not be encoded or decoded
    #[error(transparent)]
    Quantize(#[from] QuantizeError),

    /// The catalog could not describe the index
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl PartitionStoreError {
    pub(crate) fn kv(operation: &'static str, partition: PartitionKey, source: KvError) -> Self {
        PartitionStoreError::Kv {
            operation,
            partition,
            source,
        }
    }

    /// True if running the failed operation again may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            PartitionStoreError::Kv { source, .. } | PartitionStoreError::KvBatch { source, .. } => {
                source.is_retryable()
            }
            _ => false,
        }
    }
}
