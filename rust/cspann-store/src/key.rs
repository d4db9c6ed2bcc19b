use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Identifies a partition within a tree. Keys are minted by
/// [crate::PartitionStore::make_partition_key] and are unique, but carry no
/// ordering.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PartitionKey(pub u64);

impl PartitionKey {
    /// A key that never refers to a partition
    pub const INVALID: PartitionKey = PartitionKey(0);
    /// The key of the root partition of every tree
    pub const ROOT: PartitionKey = PartitionKey(1);
}

impl Display for PartitionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The level of a partition within its tree. Leaf partitions hold references
/// to indexed rows; partitions above them hold references to child
/// partitions.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Level(pub u32);

impl Level {
    /// A level no partition can have
    pub const INVALID: Level = Level(0);
    /// The level of leaf partitions
    pub const LEAF: Level = Level(1);

    /// True if partitions at this level reference indexed rows
    pub fn is_leaf(&self) -> bool {
        *self == Level::LEAF
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Namespaces an independent tree within a single vector index (for example,
/// one tree per value of a partitioning column).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeKey(Vec<u8>);

impl TreeKey {
    /// Wrap raw tree key bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The raw tree key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for TreeKey {
    fn from(value: &[u8]) -> Self {
        TreeKey(value.to_vec())
    }
}

/// Identifies an entry within a partition: a primary key reference at the
/// leaf level, or a child partition above it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChildKey {
    /// A child partition of an interior partition
    Partition(PartitionKey),
    /// The encoded primary key of an indexed row
    Primary(Vec<u8>),
}

impl From<PartitionKey> for ChildKey {
    fn from(value: PartitionKey) -> Self {
        ChildKey::Partition(value)
    }
}

/// Opaque bytes stored alongside each vector of a partition
pub type ValueBytes = Vec<u8>;
