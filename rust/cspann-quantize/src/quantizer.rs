use cspann_common::ConditionalSync;
use serde::{Deserialize, Serialize};

use crate::QuantizeError;

/// How the distance between two vectors is measured by the index
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Squared euclidean distance
    #[default]
    L2Squared,
    /// Negative inner product
    InnerProduct,
    /// One minus cosine similarity
    Cosine,
}

/// A [Quantizer] encodes vectors relative to a centroid, and restores
/// (possibly approximate) vectors from those encodings.
pub trait Quantizer: std::fmt::Debug + ConditionalSync {
    /// The dimensionality of the vectors this quantizer accepts
    fn dims(&self) -> usize;

    /// The distance metric of the index this quantizer serves
    fn distance_metric(&self) -> DistanceMetric;

    /// The exact number of bytes every encoding occupies
    fn encoded_len(&self) -> usize;

    /// Append the encoding of `vector`, relative to `centroid`, to `out`
    fn encode(
        &self,
        vector: &[f32],
        centroid: &[f32],
        out: &mut Vec<u8>,
    ) -> Result<(), QuantizeError>;

    /// Restore a vector from an encoding produced against `centroid`
    fn decode(&self, encoded: &[u8], centroid: &[f32]) -> Result<Vec<f32>, QuantizeError>;
}

pub(crate) fn read_f32(bytes: &[u8], offset: usize) -> f32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    f32::from_le_bytes(raw)
}
