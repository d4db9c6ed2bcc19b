use async_trait::async_trait;
use cspann_common::ConditionalSync;

use crate::{Batch, BatchResponse, KvError};

/// A [KvDatabase] is a facade over some ordered, transactional key-value
/// substrate. Batches run directly against it are atomic but are not
/// isolated from one another beyond what their [crate::ReadConsistency]
/// promises.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait KvDatabase: Clone + ConditionalSync {
    /// The transaction handle produced by this [KvDatabase]
    type Transaction: KvTransaction;

    /// Execute a batch outside of any transaction. If any request fails, none
    /// of the batch's writes take effect.
    async fn run(&self, batch: Batch) -> Result<BatchResponse, KvError>;

    /// Open a new transaction
    async fn begin(&self) -> Result<Self::Transaction, KvError>;
}

/// A handle to an open transaction. Handles are cheap to clone; all clones
/// refer to the same transaction.
///
/// Reads made through the transaction observe its own staged writes. A batch
/// that fails part way through stages none of its writes, and the
/// transaction remains usable afterwards.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait KvTransaction: Clone + ConditionalSync {
    /// Execute a batch within this transaction
    async fn run(&self, batch: Batch) -> Result<BatchResponse, KvError>;

    /// Make the transaction's writes durable. Fails with
    /// [KvError::TransactionRetry] if anything the transaction read was
    /// changed by another writer since it was read.
    async fn commit(&self) -> Result<(), KvError>;

    /// Discard the transaction's writes
    async fn rollback(&self) -> Result<(), KvError>;
}
