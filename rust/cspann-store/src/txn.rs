use std::future::Future;

use cspann_kv::{KvDatabase, KvTransaction};

use crate::{PartitionKey, PartitionStoreError};

/// How the body of a transaction wants it to end. The body's value is
/// returned to the caller either way.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnOutcome<T> {
    /// Commit the transaction's writes
    Commit(T),
    /// Roll the transaction's writes back
    Abort(T),
}

/// Run `body` inside a fresh transaction, committing or rolling back as it
/// asks. When the body or the commit fails with a retryable error, the whole
/// transaction is run again, up to `max_retries` times. Any other error
/// rolls the transaction back and is returned as is.
pub(crate) async fn run_transaction<Kv, T, Body, Fut>(
    kv: &Kv,
    max_retries: usize,
    operation: &'static str,
    partition: PartitionKey,
    body: Body,
) -> Result<T, PartitionStoreError>
where
    Kv: KvDatabase,
    Body: Fn(Kv::Transaction) -> Fut,
    Fut: Future<Output = Result<TxnOutcome<T>, PartitionStoreError>>,
{
    let mut attempt = 0;
    loop {
        let txn = kv
            .begin()
            .await
            .map_err(|source| PartitionStoreError::kv(operation, partition, source))?;

        let result = match body(txn.clone()).await {
            Ok(TxnOutcome::Commit(value)) => txn
                .commit()
                .await
                .map(|_| value)
                .map_err(|source| PartitionStoreError::kv(operation, partition, source)),
            Ok(TxnOutcome::Abort(value)) => {
                txn.rollback()
                    .await
                    .map_err(|source| PartitionStoreError::kv(operation, partition, source))?;
                return Ok(value);
            }
            Err(error) => {
                if let Err(rollback_error) = txn.rollback().await {
                    tracing::warn!(
                        %partition,
                        operation,
                        error = %rollback_error,
                        "failed to roll back transaction"
                    );
                }
                Err(error)
            }
        };

        match result {
            Err(error) if error.is_retryable() && attempt < max_retries => {
                attempt += 1;
                tracing::debug!(
                    %partition,
                    operation,
                    attempt,
                    error = %error,
                    "retrying transaction"
                );
            }
            result => return result,
        }
    }
}
