use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::{
    Batch, BatchResponse, Key, KeyValue, KvDatabase, KvError, KvTransaction, Request,
    RequestResult, Value,
};

#[derive(Clone, Debug)]
struct Versioned {
    value: Value,
    version: u64,
}

#[derive(Debug, Default)]
struct Committed {
    entries: BTreeMap<Key, Versioned>,
    clock: u64,
}

impl Committed {
    fn version(&self, key: &[u8]) -> Option<u64> {
        self.entries.get(key).map(|entry| entry.version)
    }

    fn range_versions(&self, start: &[u8], end: &[u8]) -> Vec<(Key, u64)> {
        if start >= end {
            return Vec::new();
        }
        self.entries
            .range::<[u8], _>((Bound::Included(start), Bound::Excluded(end)))
            .map(|(key, entry)| (key.clone(), entry.version))
            .collect()
    }

    fn apply(&mut self, writes: BTreeMap<Key, Option<Value>>) {
        if writes.is_empty() {
            return;
        }
        self.clock += 1;
        let version = self.clock;
        for (key, value) in writes {
            match value {
                Some(value) => {
                    self.entries.insert(key, Versioned { value, version });
                }
                None => {
                    self.entries.remove(&key);
                }
            }
        }
    }
}

/// Committed state, overlaid with the writes staged by a transaction and the
/// writes of the batch currently being evaluated.
struct Overlay<'a> {
    committed: &'a Committed,
    staged: &'a BTreeMap<Key, Option<Value>>,
    pending: BTreeMap<Key, Option<Value>>,
}

impl Overlay<'_> {
    fn read(&self, key: &[u8]) -> Option<Value> {
        if let Some(value) = self.pending.get(key) {
            return value.clone();
        }
        if let Some(value) = self.staged.get(key) {
            return value.clone();
        }
        self.committed
            .entries
            .get(key)
            .map(|entry| entry.value.clone())
    }

    fn scan(&self, start: &[u8], end: &[u8]) -> Vec<KeyValue> {
        if start >= end {
            return Vec::new();
        }
        let bounds = (Bound::Included(start), Bound::Excluded(end));
        let mut merged = self
            .committed
            .entries
            .range::<[u8], _>(bounds)
            .map(|(key, entry)| (key.clone(), Some(entry.value.clone())))
            .collect::<BTreeMap<_, _>>();
        for layer in [self.staged, &self.pending] {
            for (key, value) in layer.range::<[u8], _>(bounds) {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
            .into_iter()
            .filter_map(|(key, value)| value.map(|value| KeyValue { key, value }))
            .collect()
    }

    fn write(&mut self, key: Key, value: Option<Value>) {
        self.pending.insert(key, value);
    }
}

/// Keys and ranges whose committed state a batch depended on
#[derive(Default)]
struct Observations {
    keys: Vec<Key>,
    ranges: Vec<(Key, Key)>,
}

fn evaluate(
    overlay: &mut Overlay<'_>,
    batch: &Batch,
    observed: &mut Observations,
) -> Result<Vec<RequestResult>, KvError> {
    let mut results = Vec::with_capacity(batch.len());

    for request in batch.requests() {
        let result = match request {
            Request::Get { key } | Request::GetForShare { key, .. } => {
                observed.keys.push(key.clone());
                RequestResult::Get(overlay.read(key))
            }
            Request::Scan { start, end } => {
                observed.ranges.push((start.clone(), end.clone()));
                RequestResult::Scan(overlay.scan(start, end))
            }
            Request::Put { key, value } => {
                overlay.write(key.clone(), Some(value.clone()));
                RequestResult::Put
            }
            Request::CPut {
                key,
                value,
                expected,
            } => {
                observed.keys.push(key.clone());
                let actual = overlay.read(key);
                if actual != *expected {
                    return Err(KvError::ConditionFailed {
                        key: key.clone(),
                        actual,
                    });
                }
                overlay.write(key.clone(), Some(value.clone()));
                RequestResult::Put
            }
            Request::Del { key } => {
                observed.keys.push(key.clone());
                let found_key = overlay.read(key).is_some();
                overlay.write(key.clone(), None);
                RequestResult::Del { found_key }
            }
            Request::DelRange {
                start,
                end,
                return_keys,
            } => {
                observed.ranges.push((start.clone(), end.clone()));
                let keys = overlay
                    .scan(start, end)
                    .into_iter()
                    .map(|row| row.key)
                    .collect::<Vec<_>>();
                for key in &keys {
                    overlay.write(key.clone(), None);
                }
                RequestResult::DelRange {
                    keys: if *return_keys { keys } else { Vec::new() },
                }
            }
        };
        results.push(result);
    }

    Ok(results)
}

/// A trivial implementation of [KvDatabase] where all rows are kept in an
/// ordered in-memory map and never persisted.
///
/// Transactions are optimistic: every key a transaction reads (including the
/// keys behind shared locks, conditional puts and deletes) and every range it
/// scans is validated when it commits, so committed transactions are
/// serializable. All read consistencies behave like
/// [crate::ReadConsistency::Consistent], which is a valid (if conservative)
/// rendition of the weaker levels.
#[derive(Clone, Debug, Default)]
pub struct MemoryKv {
    committed: Arc<RwLock<Committed>>,
}

impl MemoryKv {
    /// Every committed row, in key order
    pub fn rows(&self) -> Vec<KeyValue> {
        self.committed
            .read()
            .entries
            .iter()
            .map(|(key, entry)| KeyValue {
                key: key.clone(),
                value: entry.value.clone(),
            })
            .collect()
    }

    /// The number of committed rows
    pub fn len(&self) -> usize {
        self.committed.read().entries.len()
    }

    /// True if no rows are committed
    pub fn is_empty(&self) -> bool {
        self.committed.read().entries.is_empty()
    }

    fn execute(&self, batch: &Batch) -> Result<BatchResponse, KvError> {
        tracing::trace!(
            requests = batch.len(),
            consistency = ?batch.read_consistency(),
            "running batch"
        );
        let mut committed = self.committed.write();
        let staged = BTreeMap::new();
        let mut overlay = Overlay {
            committed: &*committed,
            staged: &staged,
            pending: BTreeMap::new(),
        };
        let results = evaluate(&mut overlay, batch, &mut Observations::default())?;
        let writes = overlay.pending;
        committed.apply(writes);

        Ok(BatchResponse { results })
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl KvDatabase for MemoryKv {
    type Transaction = MemoryTransaction;

    async fn run(&self, batch: Batch) -> Result<BatchResponse, KvError> {
        self.execute(&batch)
    }

    async fn begin(&self) -> Result<Self::Transaction, KvError> {
        Ok(MemoryTransaction {
            db: self.clone(),
            state: Arc::new(Mutex::new(TransactionState::default())),
        })
    }
}

#[derive(Debug)]
struct ScanRecord {
    start: Key,
    end: Key,
    observed: Vec<(Key, u64)>,
}

#[derive(Debug, Default)]
struct TransactionState {
    writes: BTreeMap<Key, Option<Value>>,
    reads: HashMap<Key, Option<u64>>,
    scans: Vec<ScanRecord>,
    finished: bool,
}

/// A transaction against a [MemoryKv]
#[derive(Clone, Debug)]
pub struct MemoryTransaction {
    db: MemoryKv,
    state: Arc<Mutex<TransactionState>>,
}

impl MemoryTransaction {
    fn execute(&self, batch: &Batch) -> Result<BatchResponse, KvError> {
        tracing::trace!(requests = batch.len(), "running transactional batch");
        let committed = self.db.committed.read();
        let mut state = self.state.lock();
        if state.finished {
            return Err(KvError::TransactionFinished);
        }

        let mut observed = Observations::default();
        let outcome = {
            let mut overlay = Overlay {
                committed: &*committed,
                staged: &state.writes,
                pending: BTreeMap::new(),
            };
            evaluate(&mut overlay, batch, &mut observed).map(|results| (results, overlay.pending))
        };

        // Reads count even when the batch fails, since the caller may act on
        // what a failed conditional put reported.
        for key in observed.keys {
            state
                .reads
                .entry(key)
                .or_insert_with_key(|key| committed.version(key));
        }
        for (start, end) in observed.ranges {
            let observed = committed.range_versions(&start, &end);
            state.scans.push(ScanRecord {
                start,
                end,
                observed,
            });
        }

        let (results, pending) = outcome?;
        state.writes.extend(pending);

        Ok(BatchResponse { results })
    }

    fn finish_commit(&self) -> Result<(), KvError> {
        let mut committed = self.db.committed.write();
        let mut state = self.state.lock();
        if state.finished {
            return Err(KvError::TransactionFinished);
        }
        state.finished = true;

        for (key, version) in &state.reads {
            if committed.version(key) != *version {
                return Err(KvError::TransactionRetry(format!(
                    "key {key:?} was written concurrently"
                )));
            }
        }
        for scan in &state.scans {
            if committed.range_versions(&scan.start, &scan.end) != scan.observed {
                return Err(KvError::TransactionRetry(format!(
                    "range {:?}..{:?} was written concurrently",
                    scan.start, scan.end
                )));
            }
        }

        let writes = std::mem::take(&mut state.writes);
        committed.apply(writes);

        Ok(())
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl KvTransaction for MemoryTransaction {
    async fn run(&self, batch: Batch) -> Result<BatchResponse, KvError> {
        self.execute(&batch)
    }

    async fn commit(&self) -> Result<(), KvError> {
        self.finish_commit()
    }

    async fn rollback(&self) -> Result<(), KvError> {
        let mut state = self.state.lock();
        state.finished = true;
        state.writes.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use crate::{Batch, KvDatabase, KvError, KvTransaction, LockDurability, MemoryKv};

    #[cfg(all(target_arch = "wasm32", target_os = "unknown"))]
    use wasm_bindgen_test::wasm_bindgen_test;

    #[cfg(all(target_arch = "wasm32", target_os = "unknown"))]
    wasm_bindgen_test::wasm_bindgen_test_configure!(run_in_dedicated_worker);

    fn key(name: &str) -> Vec<u8> {
        name.as_bytes().to_vec()
    }

    #[cfg_attr(all(target_arch = "wasm32", target_os = "unknown"), wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_only_puts_when_the_condition_holds() -> Result<()> {
        let kv = MemoryKv::default();

        let mut batch = Batch::new();
        batch.cput(key("a"), vec![1], None);
        kv.run(batch).await?;

        let mut batch = Batch::new();
        batch.cput(key("a"), vec![2], None);
        let error = kv.run(batch).await.unwrap_err();
        assert_eq!(
            error,
            KvError::ConditionFailed {
                key: key("a"),
                actual: Some(vec![1])
            }
        );

        let mut batch = Batch::new();
        batch.cput(key("a"), vec![3], Some(vec![1]));
        kv.run(batch).await?;

        let mut batch = Batch::new();
        batch.get(key("a"));
        let response = kv.run(batch).await?;
        assert_eq!(response.value(0)?, Some(&vec![3]));

        Ok(())
    }

    #[cfg_attr(all(target_arch = "wasm32", target_os = "unknown"), wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_applies_no_writes_from_a_failed_batch() -> Result<()> {
        let kv = MemoryKv::default();

        let mut batch = Batch::new();
        batch.put(key("a"), vec![1]);
        kv.run(batch).await?;

        let mut batch = Batch::new();
        batch.put(key("b"), vec![2]).cput(key("a"), vec![9], None);
        assert!(kv.run(batch).await.unwrap_err().is_condition_failed());

        assert_eq!(kv.len(), 1);

        Ok(())
    }

    #[cfg_attr(all(target_arch = "wasm32", target_os = "unknown"), wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_reports_found_and_deleted_keys() -> Result<()> {
        let kv = MemoryKv::default();

        let mut batch = Batch::new();
        batch
            .put(key("a1"), vec![])
            .put(key("a2"), vec![])
            .put(key("b1"), vec![]);
        kv.run(batch).await?;

        let mut batch = Batch::new();
        batch
            .del(key("b1"))
            .del(key("b2"))
            .del_range(key("a"), key("b"), true);
        let response = kv.run(batch).await?;

        assert!(response.found_key(0)?);
        assert!(!response.found_key(1)?);
        assert_eq!(response.deleted_keys(2)?, &[key("a1"), key("a2")]);
        assert!(kv.is_empty());

        Ok(())
    }

    #[cfg_attr(all(target_arch = "wasm32", target_os = "unknown"), wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_reads_its_own_writes_and_discards_them_on_rollback() -> Result<()> {
        let kv = MemoryKv::default();
        let txn = kv.begin().await?;

        let mut batch = Batch::new();
        batch.put(key("a"), vec![1]);
        txn.run(batch).await?;

        let mut batch = Batch::new();
        batch.scan(key("a"), key("b"));
        let response = txn.run(batch).await?;
        assert_eq!(response.rows(0)?.len(), 1);

        txn.rollback().await?;
        assert!(kv.is_empty());

        let error = txn.run(Batch::new()).await.unwrap_err();
        assert_eq!(error, KvError::TransactionFinished);

        Ok(())
    }

    #[cfg_attr(all(target_arch = "wasm32", target_os = "unknown"), wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_keeps_a_transaction_usable_after_a_failed_batch() -> Result<()> {
        let kv = MemoryKv::default();

        let mut batch = Batch::new();
        batch.put(key("a"), vec![1]);
        kv.run(batch).await?;

        let txn = kv.begin().await?;
        let mut batch = Batch::new();
        batch.put(key("b"), vec![2]).cput(key("a"), vec![3], None);
        assert!(txn.run(batch).await.unwrap_err().is_condition_failed());

        let mut batch = Batch::new();
        batch.put(key("c"), vec![4]);
        txn.run(batch).await?;
        txn.commit().await?;

        let keys = kv.rows().into_iter().map(|row| row.key).collect::<Vec<_>>();
        assert_eq!(keys, vec![key("a"), key("c")]);

        Ok(())
    }

    #[cfg_attr(all(target_arch = "wasm32", target_os = "unknown"), wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_fails_to_commit_after_a_locked_key_changes() -> Result<()> {
        let kv = MemoryKv::default();

        let mut batch = Batch::new();
        batch.put(key("meta"), vec![1]);
        kv.run(batch).await?;

        let txn = kv.begin().await?;
        let mut batch = Batch::new();
        batch.get_for_share(key("meta"), LockDurability::BestEffort);
        txn.run(batch).await?;

        let mut batch = Batch::new();
        batch.put(key("meta"), vec![2]);
        kv.run(batch).await?;

        let mut batch = Batch::new();
        batch.put(key("meta/1"), vec![]);
        txn.run(batch).await?;

        let error = txn.commit().await.unwrap_err();
        assert!(error.is_retryable());
        assert_eq!(kv.len(), 1);

        Ok(())
    }

    #[cfg_attr(all(target_arch = "wasm32", target_os = "unknown"), wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_fails_to_commit_after_a_phantom_appears_in_a_scanned_range() -> Result<()> {
        let kv = MemoryKv::default();

        let txn = kv.begin().await?;
        let mut batch = Batch::new();
        batch.scan(key("p/"), key("p0"));
        txn.run(batch).await?;

        let mut batch = Batch::new();
        batch.put(key("p/x"), vec![]);
        kv.run(batch).await?;

        assert!(txn.commit().await.unwrap_err().is_retryable());

        Ok(())
    }
}
