//! Partition metadata and the lifecycle states that govern it.
//!
//! Metadata rows are stored as deterministic DAG-CBOR, so a caller's
//! expected metadata can be compared byte for byte against the stored row by
//! a conditional put.

use std::fmt::{Display, Formatter};

use cspann_common::ConditionalSync;
use cspann_quantize::Vector;
use serde::{Deserialize, Serialize};

use crate::{Level, PartitionKey, PartitionStoreError};

const METADATA_VERSION: u8 = 1;

/// The lifecycle state of a partition. The well known states are provided
/// as associated constants; other values are preserved untouched so that
/// newer writers can introduce states without breaking older readers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionState(pub u8);

impl PartitionState {
    /// The partition does not exist
    pub const MISSING: PartitionState = PartitionState(0);
    /// The partition accepts reads and writes
    pub const READY: PartitionState = PartitionState(1);
    /// The partition is being split into two targets
    pub const SPLITTING: PartitionState = PartitionState(2);
    /// The partition is being merged into other partitions
    pub const MERGING: PartitionState = PartitionState(3);
    /// The partition is the target of an in-progress split or merge
    pub const UPDATING: PartitionState = PartitionState(4);
    /// The partition's vectors are being moved out ahead of a split
    pub const DRAINING_FOR_SPLIT: PartitionState = PartitionState(5);
    /// The partition's vectors are being moved out ahead of a merge
    pub const DRAINING_FOR_MERGE: PartitionState = PartitionState(6);
    /// A new root level is being added above the partition
    pub const ADDING_LEVEL: PartitionState = PartitionState(7);
    /// The level of the partition is being removed
    pub const REMOVING_LEVEL: PartitionState = PartitionState(8);

    fn name(&self) -> Option<&'static str> {
        Some(match *self {
            PartitionState::MISSING => "Missing",
            PartitionState::READY => "Ready",
            PartitionState::SPLITTING => "Splitting",
            PartitionState::MERGING => "Merging",
            PartitionState::UPDATING => "Updating",
            PartitionState::DRAINING_FOR_SPLIT => "DrainingForSplit",
            PartitionState::DRAINING_FOR_MERGE => "DrainingForMerge",
            PartitionState::ADDING_LEVEL => "AddingLevel",
            PartitionState::REMOVING_LEVEL => "RemovingLevel",
            _ => return None,
        })
    }
}

impl Display for PartitionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "State({})", self.0),
        }
    }
}

/// A partition's state together with the partitions and time involved in
/// reaching it
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StateDetails {
    /// The current state
    pub state: PartitionState,
    /// The first partition receiving vectors, if any
    pub target1: PartitionKey,
    /// The second partition receiving vectors, if any
    pub target2: PartitionKey,
    /// The partition vectors are being received from, if any
    pub source: PartitionKey,
    /// When the state was entered, in microseconds since the Unix epoch
    pub timestamp: u64,
}

impl StateDetails {
    /// Details for `state` with no related partitions, stamped with the
    /// current time
    pub fn new(state: PartitionState) -> Self {
        Self {
            state,
            timestamp: cspann_common::unix_micros(),
            ..Default::default()
        }
    }
}

/// Everything the store records about a partition apart from its vectors
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartitionMetadata {
    /// The level of the partition within its tree
    pub level: Level,
    /// The centroid its vectors are quantized against
    pub centroid: Vector,
    /// Its lifecycle state
    pub state_details: StateDetails,
}

impl PartitionMetadata {
    /// Metadata for a [PartitionState::READY] partition
    pub fn ready(level: Level, centroid: Vector) -> Self {
        Self {
            level,
            centroid,
            state_details: StateDetails::new(PartitionState::READY),
        }
    }

    /// Metadata with an explicit state
    pub fn with_state(level: Level, centroid: Vector, state_details: StateDetails) -> Self {
        Self {
            level,
            centroid,
            state_details,
        }
    }

    /// The partition's state
    pub fn state(&self) -> PartitionState {
        self.state_details.state
    }
}

/// Decides which operations a partition state permits.
pub trait StatePermissions: std::fmt::Debug + ConditionalSync {
    /// True if vectors may be added to a partition in `state`
    fn allows_add(&self, state: PartitionState) -> bool;
}

/// Permits adds in every state except [PartitionState::MISSING] and the two
/// draining states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DefaultStatePermissions;

impl StatePermissions for DefaultStatePermissions {
    fn allows_add(&self, state: PartitionState) -> bool {
        !matches!(
            state,
            PartitionState::MISSING
                | PartitionState::DRAINING_FOR_SPLIT
                | PartitionState::DRAINING_FOR_MERGE
        )
    }
}

#[derive(Serialize, Deserialize)]
struct MetadataRecord {
    #[serde(rename = "v")]
    version: u8,
    #[serde(rename = "l")]
    level: u32,
    #[serde(rename = "c", with = "serde_bytes")]
    centroid: Vec<u8>,
    #[serde(rename = "s")]
    state: u8,
    #[serde(rename = "t1")]
    target1: u64,
    #[serde(rename = "t2")]
    target2: u64,
    #[serde(rename = "src")]
    source: u64,
    #[serde(rename = "ts")]
    timestamp: u64,
}

/// Encode metadata as the value of its metadata row
pub fn encode_metadata(metadata: &PartitionMetadata) -> Result<Vec<u8>, PartitionStoreError> {
    let details = &metadata.state_details;
    let record = MetadataRecord {
        version: METADATA_VERSION,
        level: metadata.level.0,
        centroid: metadata
            .centroid
            .iter()
            .flat_map(|component| component.to_le_bytes())
            .collect(),
        state: details.state.0,
        target1: details.target1.0,
        target2: details.target2.0,
        source: details.source.0,
        timestamp: details.timestamp,
    };

    serde_ipld_dagcbor::to_vec(&record)
        .map_err(|error| PartitionStoreError::Encoding(format!("{error}")))
}

/// Decode the value of a metadata row
pub fn decode_metadata(bytes: &[u8]) -> Result<PartitionMetadata, PartitionStoreError> {
    let record: MetadataRecord = serde_ipld_dagcbor::from_slice(bytes)
        .map_err(|error| PartitionStoreError::Encoding(format!("{error}")))?;

    if record.version != METADATA_VERSION {
        return Err(PartitionStoreError::Encoding(format!(
            "Unsupported metadata version {}",
            record.version
        )));
    }
    if record.centroid.len() % 4 != 0 {
        return Err(PartitionStoreError::Encoding(format!(
            "Centroid of {} bytes is not a whole number of components",
            record.centroid.len()
        )));
    }

    Ok(PartitionMetadata {
        level: Level(record.level),
        centroid: record
            .centroid
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
        state_details: StateDetails {
            state: PartitionState(record.state),
            target1: PartitionKey(record.target1),
            target2: PartitionKey(record.target2),
            source: PartitionKey(record.source),
            timestamp: record.timestamp,
        },
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn it_restores_every_field_of_stored_metadata() -> anyhow::Result<()> {
        let metadata = PartitionMetadata::with_state(
            Level(3),
            vec![1.5, -2.0, 0.25],
            StateDetails {
                state: PartitionState::SPLITTING,
                target1: PartitionKey(10),
                target2: PartitionKey(u64::MAX),
                source: PartitionKey::INVALID,
                timestamp: 1_700_000_000_000_000,
            },
        );

        assert_eq!(decode_metadata(&encode_metadata(&metadata)?)?, metadata);

        Ok(())
    }

    #[test]
    fn it_encodes_metadata_deterministically() -> anyhow::Result<()> {
        let metadata = PartitionMetadata::ready(Level::LEAF, vec![0.0, 1.0]);

        assert_eq!(
            encode_metadata(&metadata)?,
            encode_metadata(&metadata.clone())?
        );

        Ok(())
    }

    #[test]
    fn it_rejects_garbage() {
        assert!(matches!(
            decode_metadata(&[0xff, 0x00]),
            Err(PartitionStoreError::Encoding(_))
        ));
    }

    #[test]
    fn it_names_well_known_states() {
        assert_eq!(PartitionState::DRAINING_FOR_MERGE.to_string(), "DrainingForMerge");
        assert_eq!(PartitionState(42).to_string(), "State(42)");
    }

    #[test]
    fn it_disallows_adds_only_while_missing_or_draining() {
        let permissions = DefaultStatePermissions;
        let allowed = (0..=8)
            .map(PartitionState)
            .filter(|state| permissions.allows_add(*state))
            .collect::<Vec<_>>();

        assert_eq!(
            allowed,
            vec![
                PartitionState::READY,
                PartitionState::SPLITTING,
                PartitionState::MERGING,
                PartitionState::UPDATING,
                PartitionState::ADDING_LEVEL,
                PartitionState::REMOVING_LEVEL,
            ]
        );
    }
}
