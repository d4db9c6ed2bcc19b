use std::sync::Arc;

use cspann_quantize::{QuantizeError, Quantizer, Vector};

use crate::{ChildKey, Level, PartitionMetadata, ValueBytes};

/// A partition's metadata together with its quantized vectors. Entry `i` is
/// described by the `i`th child key, value bytes and encoding.
#[derive(Clone, Debug)]
pub struct Partition {
    metadata: PartitionMetadata,
    quantizer: Arc<dyn Quantizer>,
    codes: Vec<u8>,
    child_keys: Vec<ChildKey>,
    value_bytes: Vec<ValueBytes>,
}

impl Partition {
    /// Create a partition with no vectors
    pub fn new(metadata: PartitionMetadata, quantizer: Arc<dyn Quantizer>) -> Self {
        Self {
            metadata,
            quantizer,
            codes: Vec::new(),
            child_keys: Vec::new(),
            value_bytes: Vec::new(),
        }
    }

    /// The partition's metadata
    pub fn metadata(&self) -> &PartitionMetadata {
        &self.metadata
    }

    /// The partition's level
    pub fn level(&self) -> Level {
        self.metadata.level
    }

    /// The centroid the partition's vectors are quantized against
    pub fn centroid(&self) -> &[f32] {
        &self.metadata.centroid
    }

    /// The quantizer the partition's vectors were encoded with
    pub fn quantizer(&self) -> &Arc<dyn Quantizer> {
        &self.quantizer
    }

    /// The number of vectors in the partition
    pub fn count(&self) -> usize {
        self.child_keys.len()
    }

    /// True if the partition holds no vectors
    pub fn is_empty(&self) -> bool {
        self.child_keys.is_empty()
    }

    /// The child keys of the partition's vectors, in key order
    pub fn child_keys(&self) -> &[ChildKey] {
        &self.child_keys
    }

    /// The value bytes of the partition's vectors
    pub fn value_bytes(&self) -> &[ValueBytes] {
        &self.value_bytes
    }

    /// The position of the vector with the given child key
    pub fn find(&self, child_key: &ChildKey) -> Option<usize> {
        self.child_keys.iter().position(|key| key == child_key)
    }

    /// The quantized encoding of the `index`th vector
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn code(&self, index: usize) -> &[u8] {
        let len = self.quantizer.encoded_len();
        &self.codes[index * len..(index + 1) * len]
    }

    /// Restore the (possibly approximate) `index`th vector
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn vector(&self, index: usize) -> Result<Vector, QuantizeError> {
        self.quantizer
            .decode(self.code(index), &self.metadata.centroid)
    }

    pub(crate) fn reset(
        &mut self,
        metadata: PartitionMetadata,
        quantizer: Arc<dyn Quantizer>,
        capacity: usize,
    ) {
        self.codes.clear();
        self.codes.reserve(capacity * quantizer.encoded_len());
        self.child_keys.clear();
        self.child_keys.reserve(capacity);
        self.value_bytes.clear();
        self.value_bytes.reserve(capacity);
        self.metadata = metadata;
        self.quantizer = quantizer;
    }

    pub(crate) fn push(&mut self, code: &[u8], child_key: ChildKey, value_bytes: ValueBytes) {
        self.codes.extend_from_slice(code);
        self.child_keys.push(child_key);
        self.value_bytes.push(value_bytes);
    }
}
