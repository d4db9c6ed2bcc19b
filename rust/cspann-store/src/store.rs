use std::collections::HashSet;
use std::sync::Arc;

use cspann_common::UniqueIdGenerator;
use cspann_kv::{Batch, KvDatabase, KvError, KvTransaction, LockDurability, ReadConsistency};
use cspann_quantize::{Quantizer, UnQuantizer, VectorSet};

use crate::{
    CatalogError, ChildKey, DefaultStatePermissions, IndexCatalog, Partition, PartitionCodec,
    PartitionKey, PartitionMetadata, PartitionStoreError, StatePermissions,
    StoreConfig, TreeKey, TxnOutcome, ValueBytes, encode_metadata,
    encoding::{
        decode_child_key, end_key, index_prefix, metadata_key, start_vector_key, vector_key,
        vector_prefix,
    },
    resolve::MetadataResolver,
    txn::run_transaction,
};

/// Persists the partitions of one vector index in a transactional KV store.
///
/// Every operation is self-contained: reads run as a single batch, and
/// writes that depend on a partition's metadata run in their own
/// transaction, which locks the metadata row and is retried when the KV
/// store reports a conflict. Operations whose name starts with `try_` take
/// the metadata the caller last observed and fail with
/// [PartitionStoreError::ConditionFailed] if the stored metadata differs.
#[derive(Clone)]
pub struct PartitionStore<Kv>
where
    Kv: KvDatabase,
{
    kv: Kv,
    prefix: Vec<u8>,
    read_only: bool,
    codec: PartitionCodec,
    permissions: Arc<dyn StatePermissions>,
    resolver: MetadataResolver,
    ids: UniqueIdGenerator,
    min_consistency: ReadConsistency,
    max_transaction_retries: usize,
}

impl<Kv> PartitionStore<Kv>
where
    Kv: KvDatabase,
{
    /// Open the store of the vector index `index_id` on table `table_id`,
    /// locating its rows through `catalog`. Indexes over external row data
    /// are opened read-only.
    pub async fn open<Catalog>(
        kv: Kv,
        catalog: &Catalog,
        table_id: u32,
        index_id: u32,
        quantizer: Arc<dyn Quantizer>,
        config: StoreConfig,
    ) -> Result<Self, PartitionStoreError>
    where
        Catalog: IndexCatalog + ?Sized,
    {
        let table = catalog.table(table_id).await?;
        if !table.index_ids.contains(&index_id) {
            return Err(CatalogError::IndexNotFound {
                table: table_id,
                index: index_id,
            }
            .into());
        }

        let (tenant_id, row_table_id) = table.row_location();
        let mut store = Self::with_prefix(
            kv,
            index_prefix(tenant_id, row_table_id, index_id),
            quantizer,
            config,
        );

        if let Some(external) = table.external {
            tracing::info!(
                table_id,
                index_id,
                external_tenant_id = external.tenant_id,
                external_table_id = external.table_id,
                "vector index reads external row data; opening in read-only mode"
            );
            store.read_only = true;
        }

        Ok(store)
    }

    /// Create a store whose rows all live under `prefix`. The root
    /// partition is stored unquantized; every other partition uses
    /// `quantizer`.
    pub fn with_prefix(
        kv: Kv,
        prefix: Vec<u8>,
        quantizer: Arc<dyn Quantizer>,
        config: StoreConfig,
    ) -> Self {
        let root_quantizer: Arc<dyn Quantizer> = Arc::new(UnQuantizer::new(
            quantizer.dims(),
            quantizer.distance_metric(),
        ));

        Self {
            kv,
            prefix,
            read_only: false,
            resolver: MetadataResolver::new(quantizer.dims()),
            codec: PartitionCodec::new(root_quantizer, quantizer),
            permissions: Arc::new(DefaultStatePermissions),
            ids: UniqueIdGenerator::new(config.instance_id),
            min_consistency: config.min_consistency,
            max_transaction_retries: config.max_transaction_retries,
        }
    }

    /// Replace the policy that decides which partition states accept adds
    pub fn with_state_permissions(mut self, permissions: Arc<dyn StatePermissions>) -> Self {
        self.permissions = permissions;
        self
    }

    /// The underlying KV store
    pub fn kv(&self) -> &Kv {
        &self.kv
    }

    /// True if the store rejects every mutating operation
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Set the consistency of reads that tolerate staleness
    pub fn set_minimum_consistency(&mut self, consistency: ReadConsistency) {
        self.min_consistency = consistency;
    }

    /// A fresh codec, suitable for [PartitionStore::try_get_partition_with]
    pub fn codec(&self) -> PartitionCodec {
        self.codec.clone()
    }

    /// Mint a new, globally unique partition key
    pub fn make_partition_key(&self) -> PartitionKey {
        PartitionKey(self.ids.generate())
    }

    /// Count the vectors in a partition. The count may be stale, depending
    /// on the configured minimum consistency.
    pub async fn estimate_partition_count(
        &self,
        tree_key: &TreeKey,
        partition_key: PartitionKey,
    ) -> Result<usize, PartitionStoreError> {
        let kv_error = |source| PartitionStoreError::kv("estimate size of", partition_key, source);
        let metadata_key = self.metadata_key(tree_key, partition_key);

        let mut batch = Batch::new().with_read_consistency(self.min_consistency);
        batch.scan(start_vector_key(&metadata_key), end_key(&metadata_key));

        let response = self.kv.run(batch).await.map_err(kv_error)?;
        Ok(response.rows(0).map_err(kv_error)?.len())
    }

    /// Delete a partition's metadata and all of its vectors
    pub async fn try_delete_partition(
        &self,
        tree_key: &TreeKey,
        partition_key: PartitionKey,
    ) -> Result<(), PartitionStoreError> {
        self.ensure_writable("delete")?;
        let kv_error = |source| PartitionStoreError::kv("delete", partition_key, source);
        let metadata_key = self.metadata_key(tree_key, partition_key);
        let end = end_key(&metadata_key);

        let mut batch = Batch::new();
        batch.del_range(metadata_key, end, true);

        let response = self.kv.run(batch).await.map_err(kv_error)?;
        if response.deleted_keys(0).map_err(kv_error)?.is_empty() {
            return Err(PartitionStoreError::PartitionNotFound(partition_key));
        }

        tracing::trace!(%partition_key, "deleted partition");
        Ok(())
    }

    /// Create a partition with the given metadata and no vectors. Fails with
    /// [PartitionStoreError::ConditionFailed] if the partition already
    /// exists.
    pub async fn try_create_empty_partition(
        &self,
        tree_key: &TreeKey,
        partition_key: PartitionKey,
        metadata: &PartitionMetadata,
    ) -> Result<(), PartitionStoreError> {
        self.ensure_writable("create")?;

        let mut batch = Batch::new();
        batch.cput(
            self.metadata_key(tree_key, partition_key),
            encode_metadata(metadata)?,
            None,
        );

        self.kv
            .run(batch)
            .await
            .map_err(|error| self.resolver.condition_failed("create", partition_key, error))?;

        tracing::trace!(%partition_key, level = %metadata.level, "created partition");
        Ok(())
    }

    /// Read a partition's metadata and vectors into a new [Partition]
    pub async fn try_get_partition(
        &self,
        tree_key: &TreeKey,
        partition_key: PartitionKey,
    ) -> Result<Partition, PartitionStoreError> {
        let mut codec = self.codec();
        self.try_get_partition_with(tree_key, partition_key, &mut codec)
            .await?;
        Ok(codec.into_partition())
    }

    /// Read a partition's metadata and vectors, decoding them into the
    /// buffer owned by `codec`. The returned partition is overwritten the
    /// next time `codec` decodes.
    ///
    /// Vector rows left behind under a level other than the one in the
    /// partition's metadata are skipped.
    pub async fn try_get_partition_with<'codec>(
        &self,
        tree_key: &TreeKey,
        partition_key: PartitionKey,
        codec: &'codec mut PartitionCodec,
    ) -> Result<&'codec Partition, PartitionStoreError> {
        let kv_error = |source| PartitionStoreError::kv("get", partition_key, source);
        let metadata_key = self.metadata_key(tree_key, partition_key);

        let mut batch = Batch::new();
        batch
            .get(metadata_key.clone())
            .scan(start_vector_key(&metadata_key), end_key(&metadata_key));

        let response = self.kv.run(batch).await.map_err(kv_error)?;
        let metadata = self.resolver.resolve(
            partition_key,
            response.value(0).map_err(kv_error)?.map(Vec::as_slice),
        )?;
        let rows = response.rows(1).map_err(kv_error)?;

        let prefix = vector_prefix(&metadata_key, metadata.level);
        codec.init_for_decoding(partition_key, metadata, rows.len());
        for row in rows {
            let Some(child_key) = child_key_bytes(&row.key, &prefix, partition_key) else {
                continue;
            };
            codec.decode_partition_data(child_key, &row.value)?;
        }

        Ok(codec.partition())
    }

    /// Read the metadata of several partitions in one batch. Partitions that
    /// do not exist are reported as `None`, in the position of their key.
    pub async fn try_get_partition_metadata(
        &self,
        tree_key: &TreeKey,
        partition_keys: &[PartitionKey],
    ) -> Result<Vec<Option<PartitionMetadata>>, PartitionStoreError> {
        if partition_keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut batch = Batch::new();
        for partition_key in partition_keys {
            batch.get(self.metadata_key(tree_key, *partition_key));
        }

        let response = self.kv.run(batch).await.map_err(|source| {
            PartitionStoreError::KvBatch {
                operation: "get metadata of",
                count: partition_keys.len(),
                source,
            }
        })?;
        partition_keys
            .iter()
            .enumerate()
            .map(|(index, partition_key)| {
                let value = response.value(index).map_err(|source| {
                    PartitionStoreError::kv("get metadata of", *partition_key, source)
                })?;
                match self
                    .resolver
                    .resolve(*partition_key, value.map(Vec::as_slice))
                {
                    Ok(metadata) => Ok(Some(metadata)),
                    Err(PartitionStoreError::PartitionNotFound(_)) => Ok(None),
                    Err(error) => Err(error),
                }
            })
            .collect()
    }

    /// Replace a partition's metadata, provided it still matches `expected`
    pub async fn try_update_partition_metadata(
        &self,
        tree_key: &TreeKey,
        partition_key: PartitionKey,
        metadata: &PartitionMetadata,
        expected: &PartitionMetadata,
    ) -> Result<(), PartitionStoreError> {
        self.ensure_writable("update metadata of")?;

        let mut batch = Batch::new();
        batch.cput(
            self.metadata_key(tree_key, partition_key),
            encode_metadata(metadata)?,
            Some(encode_metadata(expected)?),
        );

        self.kv.run(batch).await.map_err(|error| {
            self.resolver
                .condition_failed("update metadata of", partition_key, error)
        })?;

        tracing::trace!(
            %partition_key,
            state = %metadata.state_details.state,
            "updated partition metadata"
        );
        Ok(())
    }

    /// Add vectors to a partition, skipping any whose child key is already
    /// present (or repeated within `child_keys`). Returns true if at least
    /// one vector was added.
    pub async fn try_add_to_partition(
        &self,
        tree_key: &TreeKey,
        partition_key: PartitionKey,
        vectors: &VectorSet,
        child_keys: &[ChildKey],
        value_bytes: &[ValueBytes],
        expected: &PartitionMetadata,
    ) -> Result<bool, PartitionStoreError> {
        self.ensure_writable("add to")?;
        if vectors.count() != child_keys.len() || child_keys.len() != value_bytes.len() {
            return Err(PartitionStoreError::InvalidArgument(format!(
                "{} vectors, {} child keys and {} value bytes do not correspond",
                vectors.count(),
                child_keys.len(),
                value_bytes.len()
            )));
        }

        run_transaction(
            &self.kv,
            self.max_transaction_retries,
            "add to",
            partition_key,
            |txn| async move {
                self.add_in_txn(
                    &txn,
                    tree_key,
                    partition_key,
                    vectors,
                    child_keys,
                    value_bytes,
                    expected,
                )
                .await
                .map(TxnOutcome::Commit)
            },
        )
        .await
    }

    /// Remove vectors from a partition by child key. Returns true if at
    /// least one of them was present.
    pub async fn try_remove_from_partition(
        &self,
        tree_key: &TreeKey,
        partition_key: PartitionKey,
        child_keys: &[ChildKey],
        expected: &PartitionMetadata,
    ) -> Result<bool, PartitionStoreError> {
        self.ensure_writable("remove from")?;

        run_transaction(
            &self.kv,
            self.max_transaction_retries,
            "remove from",
            partition_key,
            |txn| async move {
                self.remove_in_txn(&txn, tree_key, partition_key, child_keys, expected)
                    .await
                    .map(TxnOutcome::Commit)
            },
        )
        .await
    }

    /// Atomically move one vector from `source` to `target`, re-encoding it
    /// against the target's centroid. `expected` is the metadata of the
    /// target partition.
    ///
    /// Returns false without changing anything if the target does not
    /// exist, already holds the child key, or the source does not hold it.
    pub async fn try_move_vector(
        &self,
        tree_key: &TreeKey,
        source: PartitionKey,
        target: PartitionKey,
        vector: &[f32],
        child_key: &ChildKey,
        value_bytes: &[u8],
        expected: &PartitionMetadata,
    ) -> Result<bool, PartitionStoreError> {
        self.ensure_writable("move vector to")?;
        if source == target {
            return Ok(false);
        }

        run_transaction(
            &self.kv,
            self.max_transaction_retries,
            "move vector to",
            target,
            |txn| async move {
                self.move_in_txn(
                    &txn,
                    tree_key,
                    source,
                    target,
                    vector,
                    child_key,
                    value_bytes,
                    expected,
                )
                .await
            },
        )
        .await
    }

    /// Remove every vector from a partition whose state no longer accepts
    /// adds, returning how many were removed. The metadata row is kept.
    pub async fn try_clear_partition(
        &self,
        tree_key: &TreeKey,
        partition_key: PartitionKey,
        expected: &PartitionMetadata,
    ) -> Result<usize, PartitionStoreError> {
        self.ensure_writable("clear")?;

        run_transaction(
            &self.kv,
            self.max_transaction_retries,
            "clear",
            partition_key,
            |txn| async move {
                self.clear_in_txn(&txn, tree_key, partition_key, expected)
                    .await
                    .map(TxnOutcome::Commit)
            },
        )
        .await
    }

    fn ensure_writable(&self, operation: &'static str) -> Result<(), PartitionStoreError> {
        if self.read_only {
            return Err(PartitionStoreError::ReadOnly { operation });
        }
        Ok(())
    }

    fn metadata_key(&self, tree_key: &TreeKey, partition_key: PartitionKey) -> Vec<u8> {
        metadata_key(&self.prefix, tree_key, partition_key)
    }

    /// Read the metadata row with a shared lock, so that the transaction
    /// conflicts with any concurrent change to the partition's metadata
    async fn lock_metadata(
        &self,
        txn: &Kv::Transaction,
        metadata_key: &[u8],
        partition_key: PartitionKey,
        operation: &'static str,
    ) -> Result<PartitionMetadata, PartitionStoreError> {
        let kv_error = |source| PartitionStoreError::kv(operation, partition_key, source);

        let mut batch = Batch::new();
        batch.get_for_share(metadata_key.to_vec(), LockDurability::BestEffort);

        let response = txn.run(batch).await.map_err(kv_error)?;
        self.resolver.resolve(
            partition_key,
            response.value(0).map_err(kv_error)?.map(Vec::as_slice),
        )
    }

    async fn lock_and_verify(
        &self,
        txn: &Kv::Transaction,
        metadata_key: &[u8],
        partition_key: PartitionKey,
        expected: &PartitionMetadata,
        operation: &'static str,
    ) -> Result<PartitionMetadata, PartitionStoreError> {
        let metadata = self
            .lock_metadata(txn, metadata_key, partition_key, operation)
            .await?;
        verify_metadata(metadata, expected)
    }

    #[allow(clippy::too_many_arguments)]
    async fn add_in_txn(
        &self,
        txn: &Kv::Transaction,
        tree_key: &TreeKey,
        partition_key: PartitionKey,
        vectors: &VectorSet,
        child_keys: &[ChildKey],
        value_bytes: &[ValueBytes],
        expected: &PartitionMetadata,
    ) -> Result<bool, PartitionStoreError> {
        let kv_error = |source| PartitionStoreError::kv("add to", partition_key, source);
        let metadata_key = self.metadata_key(tree_key, partition_key);
        let metadata = self
            .lock_and_verify(txn, &metadata_key, partition_key, expected, "add to")
            .await?;

        let state = metadata.state_details.state;
        if !self.permissions.allows_add(state) {
            return Err(PartitionStoreError::StateViolation(format!(
                "cannot add to partition {partition_key} in state {state}"
            )));
        }

        let prefix = vector_prefix(&metadata_key, metadata.level);
        let mut exclude = HashSet::with_capacity(child_keys.len());

        // Every conflicting attempt excludes at least one more child key, so
        // the loop ends once every key has been written or excluded.
        for _ in 0..=child_keys.len() {
            let mut batch = Batch::new();
            for (index, child_key) in child_keys.iter().enumerate() {
                if !exclude.insert(child_key) {
                    continue;
                }
                let value = self.codec.encode_vector(
                    partition_key,
                    vectors.at(index),
                    &metadata.centroid,
                    &value_bytes[index],
                )?;
                batch.cput(vector_key(&prefix, child_key), value, None);
            }

            if batch.is_empty() {
                return Ok(false);
            }

            let count = batch.len();
            match txn.run(batch).await {
                Ok(_) => {
                    tracing::trace!(%partition_key, count, "added vectors to partition");
                    return Ok(true);
                }
                Err(KvError::ConditionFailed { .. }) => {
                    tracing::debug!(
                        %partition_key,
                        "child key already present; rescanning partition"
                    );
                }
                Err(error) => return Err(kv_error(error)),
            }

            let mut batch = Batch::new();
            batch.scan(start_vector_key(&metadata_key), end_key(&metadata_key));
            let response = txn.run(batch).await.map_err(kv_error)?;

            let present = response
                .rows(0)
                .map_err(kv_error)?
                .iter()
                .filter_map(|row| child_key_bytes(&row.key, &prefix, partition_key))
                .map(|child_key| decode_child_key(child_key, metadata.level))
                .collect::<Result<HashSet<_>, _>>()?;

            exclude.clear();
            exclude.extend(
                child_keys
                    .iter()
                    .filter(|child_key| present.contains(*child_key)),
            );
        }

        Err(kv_error(KvError::TransactionRetry(format!(
            "child keys kept conflicting after {} attempts",
            child_keys.len() + 1
        ))))
    }

    async fn remove_in_txn(
        &self,
        txn: &Kv::Transaction,
        tree_key: &TreeKey,
        partition_key: PartitionKey,
        child_keys: &[ChildKey],
        expected: &PartitionMetadata,
    ) -> Result<bool, PartitionStoreError> {
        let kv_error = |source| PartitionStoreError::kv("remove from", partition_key, source);
        let metadata_key = self.metadata_key(tree_key, partition_key);
        let metadata = self
            .lock_and_verify(txn, &metadata_key, partition_key, expected, "remove from")
            .await?;

        if child_keys.is_empty() {
            return Ok(false);
        }

        let prefix = vector_prefix(&metadata_key, metadata.level);
        let mut batch = Batch::new();
        for child_key in child_keys {
            batch.del(vector_key(&prefix, child_key));
        }

        let response = txn.run(batch).await.map_err(kv_error)?;
        let mut removed = false;
        for index in 0..child_keys.len() {
            removed |= response.found_key(index).map_err(kv_error)?;
        }

        tracing::trace!(%partition_key, removed, "removed vectors from partition");
        Ok(removed)
    }

    #[allow(clippy::too_many_arguments)]
    async fn move_in_txn(
        &self,
        txn: &Kv::Transaction,
        tree_key: &TreeKey,
        source: PartitionKey,
        target: PartitionKey,
        vector: &[f32],
        child_key: &ChildKey,
        value_bytes: &[u8],
        expected: &PartitionMetadata,
    ) -> Result<TxnOutcome<bool>, PartitionStoreError> {
        let kv_error = |error| PartitionStoreError::kv("move vector to", target, error);
        let target_key = self.metadata_key(tree_key, target);

        let metadata = match self
            .lock_metadata(txn, &target_key, target, "move vector to")
            .await
        {
            Ok(metadata) => metadata,
            Err(PartitionStoreError::PartitionNotFound(_)) => {
                tracing::debug!(%source, %target, "move target does not exist");
                return Ok(TxnOutcome::Commit(false));
            }
            Err(error) => return Err(error),
        };
        let metadata = verify_metadata(metadata, expected)?;

        let value =
            self.codec
                .encode_vector(target, vector, &metadata.centroid, value_bytes)?;
        let target_prefix = vector_prefix(&target_key, metadata.level);
        let source_prefix = vector_prefix(&self.metadata_key(tree_key, source), metadata.level);

        let mut batch = Batch::new();
        batch
            .cput(vector_key(&target_prefix, child_key), value, None)
            .del(vector_key(&source_prefix, child_key));

        let response = match txn.run(batch).await {
            Ok(response) => response,
            Err(KvError::ConditionFailed { .. }) => {
                tracing::debug!(%source, %target, "vector already present in move target");
                return Ok(TxnOutcome::Commit(false));
            }
            Err(error) => return Err(kv_error(error)),
        };

        if !response.found_key(1).map_err(kv_error)? {
            tracing::debug!(%source, %target, "vector no longer present in move source");
            return Ok(TxnOutcome::Abort(false));
        }

        tracing::trace!(%source, %target, "moved vector");
        Ok(TxnOutcome::Commit(true))
    }

    async fn clear_in_txn(
        &self,
        txn: &Kv::Transaction,
        tree_key: &TreeKey,
        partition_key: PartitionKey,
        expected: &PartitionMetadata,
    ) -> Result<usize, PartitionStoreError> {
        let kv_error = |source| PartitionStoreError::kv("clear", partition_key, source);
        let metadata_key = self.metadata_key(tree_key, partition_key);
        let metadata = self
            .lock_and_verify(txn, &metadata_key, partition_key, expected, "clear")
            .await?;

        let state = metadata.state_details.state;
        if self.permissions.allows_add(state) {
            return Err(PartitionStoreError::StateViolation(format!(
                "cannot clear partition {partition_key} in state {state} that still allows adds"
            )));
        }

        let mut batch = Batch::new();
        batch.del_range(start_vector_key(&metadata_key), end_key(&metadata_key), true);

        let response = txn.run(batch).await.map_err(kv_error)?;
        let count = response.deleted_keys(0).map_err(kv_error)?.len();

        tracing::trace!(%partition_key, count, "cleared partition");
        Ok(count)
    }
}

fn verify_metadata(
    actual: PartitionMetadata,
    expected: &PartitionMetadata,
) -> Result<PartitionMetadata, PartitionStoreError> {
    if actual != *expected {
        return Err(PartitionStoreError::ConditionFailed {
            actual: Box::new(actual),
        });
    }
    Ok(actual)
}

/// The child key suffix of a vector row, or `None` if the row was written
/// under a different level than the partition's current one.
fn child_key_bytes<'row>(
    row_key: &'row [u8],
    prefix: &[u8],
    partition_key: PartitionKey,
) -> Option<&'row [u8]> {
    let child_key = row_key.strip_prefix(prefix);
    if child_key.is_none() {
        tracing::debug!(%partition_key, ?row_key, "skipping vector row written at another level");
    }
    child_key
}

impl<Kv> std::fmt::Debug for PartitionStore<Kv>
where
    Kv: KvDatabase,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionStore")
            .field("prefix", &self.prefix)
            .field("read_only", &self.read_only)
            .field("min_consistency", &self.min_consistency)
            .finish_non_exhaustive()
    }
}
