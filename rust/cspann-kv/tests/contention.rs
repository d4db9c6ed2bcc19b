use anyhow::Result;
use cspann_kv::{Batch, KvDatabase, KvError, KvTransaction, LockDurability, MemoryKv};

#[cfg(target_arch = "wasm32")]
use wasm_bindgen_test::wasm_bindgen_test;
#[cfg(target_arch = "wasm32")]
wasm_bindgen_test::wasm_bindgen_test_configure!(run_in_dedicated_worker);

const COUNTER: &[u8] = b"counter";

async fn read_counter<Txn: KvTransaction>(txn: &Txn) -> Result<u64, KvError> {
    let mut batch = Batch::new();
    batch.get_for_share(COUNTER.to_vec(), LockDurability::BestEffort);
    let response = txn.run(batch).await?;
    Ok(response
        .value(0)?
        .map(|value| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(value);
            u64::from_be_bytes(raw)
        })
        .unwrap_or_default())
}

async fn increment(kv: &MemoryKv) -> Result<usize> {
    let mut retries = 0;
    loop {
        let txn = kv.begin().await?;
        let current = read_counter(&txn).await?;

        let mut batch = Batch::new();
        batch.put(COUNTER.to_vec(), (current + 1).to_be_bytes().to_vec());
        txn.run(batch).await?;

        match txn.commit().await {
            Ok(()) => return Ok(retries),
            Err(error) if error.is_retryable() => retries += 1,
            Err(error) => return Err(error.into()),
        }
    }
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
async fn interleaved_transactions_conflict_on_commit() -> Result<()> {
    let kv = MemoryKv::default();

    let first = kv.begin().await?;
    let second = kv.begin().await?;
    assert_eq!(read_counter(&first).await?, 0);
    assert_eq!(read_counter(&second).await?, 0);

    for txn in [&first, &second] {
        let mut batch = Batch::new();
        batch.put(COUNTER.to_vec(), 1u64.to_be_bytes().to_vec());
        txn.run(batch).await?;
    }

    first.commit().await?;
    assert!(second.commit().await.unwrap_err().is_retryable());
    assert_eq!(second.commit().await, Err(KvError::TransactionFinished));

    let check = kv.begin().await?;
    assert_eq!(read_counter(&check).await?, 1);
    check.rollback().await?;

    Ok(())
}

#[cfg(not(target_arch = "wasm32"))]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_increments_are_never_lost() -> Result<()> {
    let kv = MemoryKv::default();
    let mut tasks = Vec::new();

    for _ in 0..16 {
        let kv = kv.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..25 {
                increment(&kv).await?;
            }
            Ok::<_, anyhow::Error>(())
        }));
    }
    for task in tasks {
        task.await??;
    }

    let txn = kv.begin().await?;
    assert_eq!(read_counter(&txn).await?, 16 * 25);

    Ok(())
}
