#![warn(missing_docs)]

//! This crate describes the transactional key-value store that partitions of
//! a vector index are persisted into.
//!
//! A [KvDatabase] executes [Batch]es of [Request]s, either directly (each
//! batch is atomic on its own) or inside a [KvTransaction] opened with
//! [KvDatabase::begin]. Transactions stage their writes until
//! [KvTransaction::commit], at which point the backend verifies that nothing
//! the transaction read has changed in the meantime; if it has, the commit
//! fails with [KvError::TransactionRetry] and the caller is expected to run
//! the transaction again from the start.
//!
//! ```rust
//! # tokio_test::block_on(async {
//! use cspann_kv::{Batch, KvDatabase, KvTransaction, MemoryKv};
//!
//! let kv = MemoryKv::default();
//!
//! let mut batch = Batch::new();
//! batch.cput(b"a".to_vec(), b"1".to_vec(), None);
//! kv.run(batch).await.unwrap();
//!
//! let txn = kv.begin().await.unwrap();
//! let mut batch = Batch::new();
//! batch.get_for_share(b"a".to_vec(), cspann_kv::LockDurability::BestEffort);
//! let response = txn.run(batch).await.unwrap();
//! assert_eq!(response.value(0).unwrap(), Some(&b"1".to_vec()));
//! txn.commit().await.unwrap();
//! # })
//! ```

mod batch;
pub use batch::*;

mod error;
pub use error::*;

mod database;
pub use database::*;

mod memory;
pub use memory::*;

mod journal;
pub use journal::*;
