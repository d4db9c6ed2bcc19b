#![warn(missing_docs)]

//! Quantizers compress vectors into compact byte encodings relative to the
//! centroid of the partition that holds them.
//!
//! Every [Quantizer] produces encodings of a fixed length for a given
//! dimensionality, so an encoded vector can be stored in front of arbitrary
//! trailing bytes and split off again without a length prefix.
//!
//! ```rust
//! use cspann_quantize::{DistanceMetric, Quantizer, UnQuantizer};
//!
//! let quantizer = UnQuantizer::new(2, DistanceMetric::L2Squared);
//! let mut encoded = Vec::new();
//! quantizer.encode(&[1.0, 2.0], &[0.0, 0.0], &mut encoded).unwrap();
//!
//! assert_eq!(encoded.len(), quantizer.encoded_len());
//! assert_eq!(quantizer.decode(&encoded, &[0.0, 0.0]).unwrap(), vec![1.0, 2.0]);
//! ```

mod error;
pub use error::*;

mod vector;
pub use vector::*;

mod quantizer;
pub use quantizer::*;

mod unquantizer;
pub use unquantizer::*;

mod scalar;
pub use scalar::*;
