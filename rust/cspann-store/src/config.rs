use cspann_kv::ReadConsistency;
use serde::{Deserialize, Serialize};

/// Tunables of a [crate::PartitionStore]. Every field has a default, so a
/// configuration source only needs to name the fields it overrides.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// The consistency of reads that tolerate staleness, such as partition
    /// size estimates
    pub min_consistency: ReadConsistency,
    /// How many times a transaction is run again after a retryable failure
    pub max_transaction_retries: usize,
    /// Embedded in every partition key minted by the store; must differ
    /// between concurrently running stores
    pub instance_id: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            min_consistency: ReadConsistency::Inconsistent,
            max_transaction_retries: 10,
            instance_id: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_fills_in_omitted_fields() -> anyhow::Result<()> {
        let config: StoreConfig = serde_json::from_str(r#"{ "instance_id": 9 }"#)?;

        assert_eq!(
            config,
            StoreConfig {
                instance_id: 9,
                ..StoreConfig::default()
            }
        );

        let config: StoreConfig =
            serde_json::from_str(r#"{ "min_consistency": "read_uncommitted" }"#)?;
        assert_eq!(config.min_consistency, ReadConsistency::ReadUncommitted);

        Ok(())
    }
}
