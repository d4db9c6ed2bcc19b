//! Conversion between partitions and the rows that persist them.
//!
//! A [PartitionCodec] owns a single [Partition] buffer that is overwritten
//! each time a partition is decoded, so a caller reading many partitions in
//! turn avoids reallocating. The decoded partition is only ever lent out by
//! [PartitionCodec::partition]; the borrow ends before the codec can decode
//! again, and [PartitionCodec::into_partition] or a clone is needed to keep
//! the partition beyond that.

use std::sync::Arc;

use cspann_quantize::{QuantizeError, Quantizer};

use crate::{
    Partition, PartitionKey, PartitionMetadata, PartitionStoreError, encoding::decode_child_key,
};

/// Encodes vector rows and decodes scanned rows back into a [Partition]
#[derive(Clone, Debug)]
pub struct PartitionCodec {
    root_quantizer: Arc<dyn Quantizer>,
    quantizer: Arc<dyn Quantizer>,
    partition: Partition,
}

impl PartitionCodec {
    /// Create a codec that uses `root_quantizer` for the root partition and
    /// `quantizer` for every other partition
    pub fn new(root_quantizer: Arc<dyn Quantizer>, quantizer: Arc<dyn Quantizer>) -> Self {
        Self {
            partition: Partition::new(PartitionMetadata::default(), quantizer.clone()),
            root_quantizer,
            quantizer,
        }
    }

    /// The quantizer used for the vectors of `partition_key`
    pub fn quantizer_for(&self, partition_key: PartitionKey) -> &Arc<dyn Quantizer> {
        if partition_key == PartitionKey::ROOT {
            &self.root_quantizer
        } else {
            &self.quantizer
        }
    }

    /// Encode the value of a vector row: the quantized vector followed by
    /// its value bytes
    pub fn encode_vector(
        &self,
        partition_key: PartitionKey,
        vector: &[f32],
        centroid: &[f32],
        value_bytes: &[u8],
    ) -> Result<Vec<u8>, QuantizeError> {
        let quantizer = self.quantizer_for(partition_key);
        let mut value = Vec::with_capacity(quantizer.encoded_len() + value_bytes.len());
        quantizer.encode(vector, centroid, &mut value)?;
        value.extend_from_slice(value_bytes);
        Ok(value)
    }

    /// Discard the previously decoded partition and start decoding
    /// `partition_key`, expecting roughly `capacity` rows
    pub fn init_for_decoding(
        &mut self,
        partition_key: PartitionKey,
        metadata: PartitionMetadata,
        capacity: usize,
    ) {
        let quantizer = self.quantizer_for(partition_key).clone();
        self.partition.reset(metadata, quantizer, capacity);
    }

    /// Decode one vector row into the partition being decoded. `child_key`
    /// is the part of the row key that follows the vector prefix.
    pub fn decode_partition_data(
        &mut self,
        child_key: &[u8],
        value: &[u8],
    ) -> Result<(), PartitionStoreError> {
        let child_key = decode_child_key(child_key, self.partition.level())?;
        let code_len = self.partition.quantizer().encoded_len();
        if value.len() < code_len {
            return Err(PartitionStoreError::Encoding(format!(
                "Vector row of {} bytes is shorter than its {code_len} byte encoding",
                value.len()
            )));
        }

        let (code, value_bytes) = value.split_at(code_len);
        self.partition.push(code, child_key, value_bytes.to_vec());
        Ok(())
    }

    /// The most recently decoded partition
    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Take ownership of the most recently decoded partition
    pub fn into_partition(self) -> Partition {
        self.partition
    }
}
