use thiserror::Error;

/// Errors that can occur while quantizing or restoring vectors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuantizeError {
    /// A vector did not have the dimensionality its quantizer or set expects
    #[error("Expected a vector with {expected} dimensions, got {actual}")]
    DimensionMismatch {
        /// The dimensionality that was expected
        expected: usize,
        /// The dimensionality that was provided
        actual: usize,
    },

    /// Encoded bytes could not be interpreted as a vector
    #[error("Malformed vector encoding: {0}")]
    MalformedEncoding(String),
}

pub(crate) fn check_dims(expected: usize, actual: usize) -> Result<(), QuantizeError> {
    if expected != actual {
        return Err(QuantizeError::DimensionMismatch { expected, actual });
    }
    Ok(())
}
