//! Scalar quantization of centroid residuals.
//!
//! The residual `vector - centroid` is compressed to one `u8` per component
//! by finding its min and max, then linearly mapping each component to
//! \[0, 255\]. The encoding is laid out as:
//!
//! ```text
//! | min: f32 LE | scale: f32 LE | code: u8 × dims |
//! ```
//!
//! where `scale` is `(max - min) / 255`. Residuals shrink as partitions get
//! tighter, so encoding against the centroid keeps the quantization error
//! proportional to the partition's radius rather than the vector's norm.

use crate::{DistanceMetric, QuantizeError, Quantizer, check_dims, quantizer::read_f32};

const HEADER_LEN: usize = 8;

/// A lossy [Quantizer] storing one byte per dimension plus an 8 byte header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScalarQuantizer {
    dims: usize,
    metric: DistanceMetric,
}

impl ScalarQuantizer {
    /// Create a scalar quantizer for `dims`-dimensional vectors
    pub fn new(dims: usize, metric: DistanceMetric) -> Self {
        Self { dims, metric }
    }
}

impl Quantizer for ScalarQuantizer {
    fn dims(&self) -> usize {
        self.dims
    }

    fn distance_metric(&self) -> DistanceMetric {
        self.metric
    }

    fn encoded_len(&self) -> usize {
        HEADER_LEN + self.dims
    }

    fn encode(
        &self,
        vector: &[f32],
        centroid: &[f32],
        out: &mut Vec<u8>,
    ) -> Result<(), QuantizeError> {
        check_dims(self.dims, vector.len())?;
        check_dims(self.dims, centroid.len())?;

        let residual = vector
            .iter()
            .zip(centroid)
            .map(|(component, center)| component - center)
            .collect::<Vec<_>>();

        let (min, max) = residual
            .iter()
            .fold((f32::MAX, f32::MIN), |(min, max), &value| {
                (min.min(value), max.max(value))
            });
        let (min, range) = if residual.is_empty() {
            (0.0, 0.0)
        } else {
            (min, max - min)
        };

        out.reserve(self.encoded_len());
        if range < f32::EPSILON {
            out.extend_from_slice(&min.to_le_bytes());
            out.extend_from_slice(&0f32.to_le_bytes());
            out.extend(std::iter::repeat_n(128u8, self.dims));
            return Ok(());
        }

        let inv_scale = 255.0 / range;
        out.extend_from_slice(&min.to_le_bytes());
        out.extend_from_slice(&(range / 255.0).to_le_bytes());
        out.extend(
            residual
                .iter()
                .map(|value| ((value - min) * inv_scale).round().clamp(0.0, 255.0) as u8),
        );

        Ok(())
    }

    fn decode(&self, encoded: &[u8], centroid: &[f32]) -> Result<Vec<f32>, QuantizeError> {
        check_dims(self.dims, centroid.len())?;
        if encoded.len() != self.encoded_len() {
            return Err(QuantizeError::MalformedEncoding(format!(
                "expected {} bytes, got {}",
                self.encoded_len(),
                encoded.len()
            )));
        }

        let min = read_f32(encoded, 0);
        let scale = read_f32(encoded, 4);
        Ok(encoded[HEADER_LEN..]
            .iter()
            .zip(centroid)
            .map(|(&code, center)| {
                if scale == 0.0 {
                    center + min
                } else {
                    center + min + code as f32 * scale
                }
            })
            .collect())
    }
}
