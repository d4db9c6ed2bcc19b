use crate::{DistanceMetric, QuantizeError, Quantizer, check_dims, quantizer::read_f32};

/// A [Quantizer] that stores vectors losslessly as little-endian `f32`
/// components, ignoring the centroid. The root partition of every tree uses
/// this encoding, since the centroids of its children are compared with
/// queries directly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnQuantizer {
    dims: usize,
    metric: DistanceMetric,
}

impl UnQuantizer {
    /// Create an unquantizer for `dims`-dimensional vectors
    pub fn new(dims: usize, metric: DistanceMetric) -> Self {
        Self { dims, metric }
    }
}

impl Quantizer for UnQuantizer {
    fn dims(&self) -> usize {
        self.dims
    }

    fn distance_metric(&self) -> DistanceMetric {
        self.metric
    }

    fn encoded_len(&self) -> usize {
        self.dims * 4
    }

    fn encode(
        &self,
        vector: &[f32],
        _centroid: &[f32],
        out: &mut Vec<u8>,
    ) -> Result<(), QuantizeError> {
        check_dims(self.dims, vector.len())?;
        out.reserve(self.encoded_len());
        for component in vector {
            out.extend_from_slice(&component.to_le_bytes());
        }
        Ok(())
    }

    fn decode(&self, encoded: &[u8], _centroid: &[f32]) -> Result<Vec<f32>, QuantizeError> {
        if encoded.len() != self.encoded_len() {
            return Err(QuantizeError::MalformedEncoding(format!(
                "expected {} bytes, got {}",
                self.encoded_len(),
                encoded.len()
            )));
        }
        Ok((0..self.dims)
            .map(|index| read_f32(encoded, index * 4))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_restores_vectors_exactly() -> anyhow::Result<()> {
        let quantizer = UnQuantizer::new(3, DistanceMetric::Cosine);
        let vector = [1.5, -0.25, f32::MAX];
        let mut encoded = Vec::new();

        quantizer.encode(&vector, &[9.0, 9.0, 9.0], &mut encoded)?;

        assert_eq!(encoded.len(), 12);
        assert_eq!(quantizer.decode(&encoded, &[0.0; 3])?, vector.to_vec());

        Ok(())
    }

    #[test]
    fn it_rejects_truncated_encodings() {
        let quantizer = UnQuantizer::new(2, DistanceMetric::L2Squared);

        assert!(matches!(
            quantizer.decode(&[0; 7], &[0.0, 0.0]),
            Err(QuantizeError::MalformedEncoding(_))
        ));
    }
}
