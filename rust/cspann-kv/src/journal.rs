//! Journaled KV wrapper for tracking the traffic that reaches a backend.
//!
//! This module provides [`JournaledKv`], a wrapper around any [`KvDatabase`]
//! that records every request and transaction boundary for later inspection.
//! This is primarily useful for testing, particularly for verifying that an
//! operation issued no KV calls at all, or only the calls it was expected to.
//!
//! # Example
//!
//! ```text
//! let journaled = JournaledKv::new(MemoryKv::default());
//!
//! journaled.run(batch).await?;
//!
//! assert_eq!(journaled.operations(), vec![Operation::Get]);
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    Batch, BatchResponse, Key, KvDatabase, KvError, KvTransaction, Operation, ReadConsistency,
};

/// A single entry in the journal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    /// A request was sent to the backend, either directly or within a
    /// transaction
    Request {
        /// The kind of request
        operation: Operation,
        /// The key (or start key) addressed by the request
        key: Key,
        /// The read consistency of the batch that carried the request
        consistency: ReadConsistency,
        /// Whether the request was part of a transaction
        transactional: bool,
    },
    /// A transaction was opened
    Begin,
    /// A transaction commit was attempted
    Commit,
    /// A transaction was rolled back
    Rollback,
}

#[derive(Debug, Default)]
struct JournalState {
    log: Vec<JournalEntry>,
    enabled: bool,
}

impl JournalState {
    fn push(&mut self, entry: JournalEntry) {
        // Only record if journaling is enabled
        if self.enabled {
            self.log.push(entry);
        }
    }

    fn record(&mut self, batch: &Batch, transactional: bool) {
        for request in batch.requests() {
            self.push(JournalEntry::Request {
                operation: request.operation(),
                key: request.key().to_vec(),
                consistency: batch.read_consistency(),
                transactional,
            });
        }
    }
}

type SharedJournal = Arc<RwLock<JournalState>>;

/// A [KvDatabase] wrapper that journals every request it forwards.
///
/// The journal is shared by all clones of the wrapper and by every
/// transaction opened through it.
#[derive(Clone, Debug)]
pub struct JournaledKv<Db>
where
    Db: KvDatabase,
{
    backend: Db,
    state: SharedJournal,
}

impl<Db> JournaledKv<Db>
where
    Db: KvDatabase,
{
    /// Create a new journaled wrapper that records all traffic.
    pub fn new(backend: Db) -> Self {
        Self {
            backend,
            state: Arc::new(RwLock::new(JournalState {
                log: Vec::new(),
                enabled: true,
            })),
        }
    }

    /// The wrapped backend
    pub fn backend(&self) -> &Db {
        &self.backend
    }

    /// Get a copy of every recorded entry, in the order it occurred.
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.state.read().log.clone()
    }

    /// Get only the kinds of request that were sent, in order.
    pub fn operations(&self) -> Vec<Operation> {
        self.state
            .read()
            .log
            .iter()
            .filter_map(|entry| match entry {
                JournalEntry::Request { operation, .. } => Some(*operation),
                _ => None,
            })
            .collect()
    }

    /// Get the read consistency of every request of the given kind, in order.
    pub fn consistencies(&self, kind: Operation) -> Vec<ReadConsistency> {
        self.state
            .read()
            .log
            .iter()
            .filter_map(|entry| match entry {
                JournalEntry::Request {
                    operation,
                    consistency,
                    ..
                } if *operation == kind => Some(*consistency),
                _ => None,
            })
            .collect()
    }

    /// True if nothing has been recorded.
    pub fn is_untouched(&self) -> bool {
        self.state.read().log.is_empty()
    }

    /// Clear the journal, typically before starting an operation to measure.
    pub fn clear_journal(&self) {
        self.state.write().log.clear();
    }

    /// Disable journaling - traffic will not be recorded
    pub fn disable_journal(&self) {
        self.state.write().enabled = false;
    }

    /// Enable journaling - traffic will be recorded
    pub fn enable_journal(&self) {
        self.state.write().enabled = true;
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl<Db> KvDatabase for JournaledKv<Db>
where
    Db: KvDatabase,
{
    type Transaction = JournaledTransaction<Db::Transaction>;

    async fn run(&self, batch: Batch) -> Result<BatchResponse, KvError> {
        self.state.write().record(&batch, false);
        self.backend.run(batch).await
    }

    async fn begin(&self) -> Result<Self::Transaction, KvError> {
        self.state.write().push(JournalEntry::Begin);
        Ok(JournaledTransaction {
            inner: self.backend.begin().await?,
            state: self.state.clone(),
        })
    }
}

/// A transaction opened through a [JournaledKv]
#[derive(Clone, Debug)]
pub struct JournaledTransaction<Txn> {
    inner: Txn,
    state: SharedJournal,
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl<Txn> KvTransaction for JournaledTransaction<Txn>
where
    Txn: KvTransaction,
{
    async fn run(&self, batch: Batch) -> Result<BatchResponse, KvError> {
        self.state.write().record(&batch, true);
        self.inner.run(batch).await
    }

    async fn commit(&self) -> Result<(), KvError> {
        self.state.write().push(JournalEntry::Commit);
        self.inner.commit().await
    }

    async fn rollback(&self) -> Result<(), KvError> {
        self.state.write().push(JournalEntry::Rollback);
        self.inner.rollback().await
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::MemoryKv;

    #[cfg(all(target_arch = "wasm32", target_os = "unknown"))]
    use wasm_bindgen_test::wasm_bindgen_test;

    #[cfg(all(target_arch = "wasm32", target_os = "unknown"))]
    wasm_bindgen_test::wasm_bindgen_test_configure!(run_in_dedicated_worker);

    #[cfg_attr(all(target_arch = "wasm32", target_os = "unknown"), wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_records_direct_and_transactional_traffic() -> Result<()> {
        let kv = JournaledKv::new(MemoryKv::default());

        let mut batch = Batch::new();
        batch.put(vec![1], vec![10]);
        kv.run(batch).await?;

        let txn = kv.begin().await?;
        let mut batch = Batch::new();
        batch.get(vec![1]).del(vec![1]);
        txn.run(batch).await?;
        txn.commit().await?;

        assert_eq!(
            kv.journal(),
            vec![
                JournalEntry::Request {
                    operation: Operation::Put,
                    key: vec![1],
                    consistency: ReadConsistency::Consistent,
                    transactional: false
                },
                JournalEntry::Begin,
                JournalEntry::Request {
                    operation: Operation::Get,
                    key: vec![1],
                    consistency: ReadConsistency::Consistent,
                    transactional: true
                },
                JournalEntry::Request {
                    operation: Operation::Del,
                    key: vec![1],
                    consistency: ReadConsistency::Consistent,
                    transactional: true
                },
                JournalEntry::Commit,
            ]
        );
        assert!(kv.backend().is_empty());

        Ok(())
    }

    #[cfg_attr(all(target_arch = "wasm32", target_os = "unknown"), wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_skips_recording_while_disabled() -> Result<()> {
        let kv = JournaledKv::new(MemoryKv::default());

        kv.disable_journal();
        let mut batch = Batch::new();
        batch.put(vec![1], vec![10]);
        kv.run(batch).await?;
        assert!(kv.is_untouched());

        kv.enable_journal();
        let mut batch = Batch::new();
        batch.get(vec![1]);
        kv.run(batch).await?;
        assert_eq!(kv.operations(), vec![Operation::Get]);

        kv.clear_journal();
        assert!(kv.is_untouched());

        Ok(())
    }

    #[cfg_attr(all(target_arch = "wasm32", target_os = "unknown"), wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_records_the_read_consistency_of_each_batch() -> Result<()> {
        let kv = JournaledKv::new(MemoryKv::default());

        let mut batch = Batch::new().with_read_consistency(ReadConsistency::Inconsistent);
        batch.scan(vec![0], vec![9]);
        kv.run(batch).await?;

        let mut batch = Batch::new();
        batch.scan(vec![0], vec![9]).get(vec![1]);
        kv.run(batch).await?;

        assert_eq!(
            kv.consistencies(Operation::Scan),
            vec![ReadConsistency::Inconsistent, ReadConsistency::Consistent]
        );
        assert_eq!(
            kv.consistencies(Operation::Get),
            vec![ReadConsistency::Consistent]
        );

        Ok(())
    }
}
