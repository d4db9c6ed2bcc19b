use cspann_kv::KvError;

use crate::{
    Level, PartitionKey, PartitionMetadata, PartitionState, PartitionStoreError, StateDetails,
    decode_metadata,
};

/// Turns metadata reads into [PartitionMetadata], supplying the metadata of
/// a root partition that was never explicitly created.
#[derive(Clone, Debug)]
pub(crate) struct MetadataResolver {
    dims: usize,
}

impl MetadataResolver {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    /// The metadata of a root partition with no metadata row: a ready leaf
    /// with a zero centroid
    pub fn default_root(&self) -> PartitionMetadata {
        PartitionMetadata::with_state(
            Level::LEAF,
            vec![0.0; self.dims],
            StateDetails {
                state: PartitionState::READY,
                ..Default::default()
            },
        )
    }

    pub fn resolve(
        &self,
        partition_key: PartitionKey,
        value: Option<&[u8]>,
    ) -> Result<PartitionMetadata, PartitionStoreError> {
        match value {
            Some(bytes) => decode_metadata(bytes),
            None if partition_key == PartitionKey::ROOT => Ok(self.default_root()),
            None => Err(PartitionStoreError::PartitionNotFound(partition_key)),
        }
    }

    /// Map a failed conditional put of a metadata row onto the store's
    /// errors: an absent row means the partition is gone, any other row is
    /// reported as the metadata that was found instead.
    pub fn condition_failed(
        &self,
        operation: &'static str,
        partition_key: PartitionKey,
        error: KvError,
    ) -> PartitionStoreError {
        match error {
            KvError::ConditionFailed { actual: None, .. } => {
                PartitionStoreError::PartitionNotFound(partition_key)
            }
            KvError::ConditionFailed {
                actual: Some(bytes),
                ..
            } => match decode_metadata(&bytes) {
                Ok(actual) => PartitionStoreError::ConditionFailed {
                    actual: Box::new(actual),
                },
                Err(error) => error,
            },
            error => PartitionStoreError::kv(operation, partition_key, error),
        }
    }
}
