#![warn(missing_docs)]

//! This crate persists the partitions of a hierarchical vector index in a
//! transactional key-value store (see [cspann_kv]).
//!
//! A vector index is a forest of trees, each identified by a [TreeKey]. Every
//! tree is made of partitions identified by a [PartitionKey]; a partition
//! records its [PartitionMetadata] (level, centroid and lifecycle state) in a
//! metadata row, and each of its vectors in a vector row keyed by the vector's
//! [ChildKey]. Vectors are quantized against the partition's centroid (see
//! [cspann_quantize]), except in the root partition, which stores them
//! exactly.
//!
//! The [PartitionStore] exposes the operations that the index's search and
//! maintenance algorithms are built from. Each operation is atomic on its
//! own, and mutating operations guard themselves with the metadata the
//! caller last observed, so that concurrent splits and merges are detected
//! instead of silently interleaved.
//!
//! ```rust
//! # tokio_test::block_on(async {
//! use std::sync::Arc;
//!
//! use cspann_kv::MemoryKv;
//! use cspann_quantize::{DistanceMetric, ScalarQuantizer, VectorSet};
//! use cspann_store::{
//!     ChildKey, Level, PartitionMetadata, PartitionStore, StoreConfig, TreeKey,
//! };
//!
//! let store = PartitionStore::with_prefix(
//!     MemoryKv::default(),
//!     vec![0x01],
//!     Arc::new(ScalarQuantizer::new(2, DistanceMetric::L2Squared)),
//!     StoreConfig::default(),
//! );
//! let tree = TreeKey::default();
//! let partition = store.make_partition_key();
//! let metadata = PartitionMetadata::ready(Level::LEAF, vec![0.0, 0.0]);
//!
//! store
//!     .try_create_empty_partition(&tree, partition, &metadata)
//!     .await
//!     .unwrap();
//!
//! let vectors = VectorSet::from_vectors(2, &[[1.0, 2.0]]).unwrap();
//! let added = store
//!     .try_add_to_partition(
//!         &tree,
//!         partition,
//!         &vectors,
//!         &[ChildKey::Primary(b"row-1".to_vec())],
//!         &[Vec::new()],
//!         &metadata,
//!     )
//!     .await
//!     .unwrap();
//!
//! assert!(added);
//! assert_eq!(store.estimate_partition_count(&tree, partition).await.unwrap(), 1);
//! # })
//! ```

mod key;
pub use key::*;

mod error;
pub use error::*;

mod metadata;
pub use metadata::*;

pub mod encoding;

mod partition;
pub use partition::*;

mod codec;
pub use codec::*;

mod catalog;
pub use catalog::*;

mod config;
pub use config::*;

mod resolve;

mod txn;
pub use txn::TxnOutcome;

mod store;
pub use store::*;
