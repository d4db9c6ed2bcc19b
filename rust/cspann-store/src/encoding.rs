//! Order-preserving layout of partition rows in the KV keyspace.
//!
//! Every partition of a tree occupies a contiguous key range rooted at its
//! metadata key:
//!
//! ```text
//! metadata key: | index prefix | tree key | partition key |
//! vector key:   | metadata key | level | child key |
//! ```
//!
//! The tree key is written as an escaped, terminated byte string and the
//! partition key and level as ordered unsigned varints, so each component
//! is self-delimiting and no metadata key is a prefix of another. Because
//! the level of every partition is at least [Level::LEAF], its vector keys
//! sort strictly after its metadata key, and the whole partition falls
//! inside `[metadata key, prefix_end(metadata key))`.
//!
//! Leaf child keys are appended as raw primary key bytes (which are already
//! ordered and self-delimiting); interior child keys are ordered varints.

use crate::{ChildKey, Level, PartitionKey, PartitionStoreError, TreeKey};

const BYTES_MARKER: u8 = 0x12;
const ESCAPE: u8 = 0x00;
const ESCAPED_NULL: u8 = 0xff;
const ESCAPED_TERMINATOR: u8 = 0x01;

const TENANT_MARKER: u8 = 0xfe;

const INT_ZERO: u8 = 136;
const INT_SMALL: u64 = 109;
const INT_MAX: u8 = 0xfd;
const INT_MAX_WIDTH: u8 = 8;

/// The tenant whose keys carry no tenant prefix
pub const SYSTEM_TENANT: u64 = 1;

/// Append an unsigned integer such that the byte-wise order of encodings
/// matches the numeric order of values.
pub fn encode_uvarint(out: &mut Vec<u8>, value: u64) {
    if value <= INT_SMALL {
        out.push(INT_ZERO + value as u8);
        return;
    }

    let width = (u64::BITS - value.leading_zeros()).div_ceil(8) as u8;
    out.push(INT_MAX - INT_MAX_WIDTH + width);
    out.extend_from_slice(&value.to_be_bytes()[(8 - width as usize)..]);
}

/// Decode an integer written by [encode_uvarint], returning it together
/// with the unread remainder of `bytes`.
pub fn decode_uvarint(bytes: &[u8]) -> Result<(u64, &[u8]), PartitionStoreError> {
    let (&marker, rest) = bytes
        .split_first()
        .ok_or_else(|| PartitionStoreError::Encoding("Empty integer encoding".into()))?;

    match marker {
        marker if (INT_ZERO..=INT_ZERO + INT_SMALL as u8).contains(&marker) => {
            Ok(((marker - INT_ZERO) as u64, rest))
        }
        marker if marker > INT_ZERO + INT_SMALL as u8 && marker <= INT_MAX => {
            let width = (marker - (INT_MAX - INT_MAX_WIDTH)) as usize;
            if rest.len() < width {
                return Err(PartitionStoreError::Encoding(format!(
                    "Integer encoding needs {width} bytes, only {} remain",
                    rest.len()
                )));
            }
            let (digits, rest) = rest.split_at(width);
            let value = digits
                .iter()
                .fold(0u64, |value, digit| (value << 8) | *digit as u64);
            Ok((value, rest))
        }
        marker => Err(PartitionStoreError::Encoding(format!(
            "Unknown integer marker {marker:#04x}"
        ))),
    }
}

/// Append a byte string such that encodings sort like their inputs and no
/// encoding is a prefix of another.
pub fn encode_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.reserve(bytes.len() + 3);
    out.push(BYTES_MARKER);
    for byte in bytes {
        out.push(*byte);
        if *byte == ESCAPE {
            out.push(ESCAPED_NULL);
        }
    }
    out.push(ESCAPE);
    out.push(ESCAPED_TERMINATOR);
}

/// The smallest key greater than every key that starts with `key`. An
/// all-`0xff` key has no such bound, in which case the key itself is
/// returned.
pub fn prefix_end(key: &[u8]) -> Vec<u8> {
    let mut end = key.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return end;
        }
    }
    key.to_vec()
}

/// The prefix shared by every row of one vector index
pub fn index_prefix(tenant: u64, table: u32, index: u32) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(16);
    if tenant != SYSTEM_TENANT {
        prefix.push(TENANT_MARKER);
        encode_uvarint(&mut prefix, tenant);
    }
    encode_uvarint(&mut prefix, table as u64);
    encode_uvarint(&mut prefix, index as u64);
    prefix
}

/// The key of a partition's metadata row
pub fn metadata_key(prefix: &[u8], tree_key: &TreeKey, partition_key: PartitionKey) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + tree_key.as_bytes().len() + 12);
    key.extend_from_slice(prefix);
    encode_bytes(&mut key, tree_key.as_bytes());
    encode_uvarint(&mut key, partition_key.0);
    key
}

/// The prefix shared by every vector row of a partition at `level`
pub fn vector_prefix(metadata_key: &[u8], level: Level) -> Vec<u8> {
    let mut key = Vec::with_capacity(metadata_key.len() + 5);
    key.extend_from_slice(metadata_key);
    encode_uvarint(&mut key, level.0 as u64);
    key
}

/// The first key that can hold a vector row of the partition
pub fn start_vector_key(metadata_key: &[u8]) -> Vec<u8> {
    let mut key = metadata_key.to_vec();
    key.push(0x00);
    key
}

/// The exclusive end of the partition's key range
pub fn end_key(metadata_key: &[u8]) -> Vec<u8> {
    prefix_end(metadata_key)
}

/// The key of a single vector row
pub fn vector_key(vector_prefix: &[u8], child_key: &ChildKey) -> Vec<u8> {
    let mut key = vector_prefix.to_vec();
    encode_child_key(&mut key, child_key);
    key
}

/// Append the encoding of a child key
pub fn encode_child_key(out: &mut Vec<u8>, child_key: &ChildKey) {
    match child_key {
        ChildKey::Partition(partition_key) => encode_uvarint(out, partition_key.0),
        ChildKey::Primary(primary_key) => out.extend_from_slice(primary_key),
    }
}

/// Decode the child key that follows the vector prefix of a row belonging
/// to a partition at `level`.
pub fn decode_child_key(suffix: &[u8], level: Level) -> Result<ChildKey, PartitionStoreError> {
    if level.is_leaf() {
        return Ok(ChildKey::Primary(suffix.to_vec()));
    }

    let (partition_key, rest) = decode_uvarint(suffix)?;
    if !rest.is_empty() {
        return Err(PartitionStoreError::Encoding(format!(
            "{} trailing bytes after child partition key",
            rest.len()
        )));
    }
    Ok(ChildKey::Partition(PartitionKey(partition_key)))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn uvarint(value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        encode_uvarint(&mut out, value);
        out
    }

    #[test]
    fn it_encodes_small_integers_in_one_byte() {
        assert_eq!(uvarint(0), vec![136]);
        assert_eq!(uvarint(1), vec![137]);
        assert_eq!(uvarint(109), vec![245]);
        assert_eq!(uvarint(110), vec![246, 110]);
        assert_eq!(uvarint(256), vec![247, 1, 0]);
        assert_eq!(uvarint(u64::MAX).len(), 9);
    }

    #[test]
    fn it_rejects_truncated_integers() {
        assert!(decode_uvarint(&[247, 1]).is_err());
        assert!(decode_uvarint(&[]).is_err());
        assert!(decode_uvarint(&[0x01]).is_err());
    }

    #[test]
    fn it_escapes_nulls_in_byte_strings() {
        let mut out = Vec::new();
        encode_bytes(&mut out, &[1, 0, 2]);

        assert_eq!(out, vec![BYTES_MARKER, 1, 0, 0xff, 2, 0, 1]);
    }

    #[test]
    fn it_computes_prefix_ends() {
        assert_eq!(prefix_end(&[1, 2, 3]), vec![1, 2, 4]);
        assert_eq!(prefix_end(&[1, 0xff, 0xff]), vec![2]);
        assert_eq!(prefix_end(&[0xff]), vec![0xff]);
    }

    #[test]
    fn it_omits_the_tenant_marker_for_the_system_tenant() {
        assert_eq!(index_prefix(SYSTEM_TENANT, 104, 2), vec![240, 138]);
        assert_eq!(index_prefix(5, 104, 2), vec![TENANT_MARKER, 141, 240, 138]);
    }

    #[test]
    fn it_keeps_vector_rows_inside_their_partition_range() {
        let metadata = metadata_key(&[200], &TreeKey::default(), PartitionKey(255));
        let start = start_vector_key(&metadata);
        let end = end_key(&metadata);

        for level in [Level::LEAF, Level(2), Level(500)] {
            let prefix = vector_prefix(&metadata, level);
            for child in [
                ChildKey::Primary(vec![]),
                ChildKey::Primary(vec![0xff; 4]),
                ChildKey::Partition(PartitionKey(u64::MAX)),
            ] {
                let key = vector_key(&prefix, &child);
                assert!(metadata < start && start <= key && key < end);
            }
        }
    }

    #[test]
    fn it_separates_vector_keys_by_level() {
        let metadata = metadata_key(&[], &TreeKey::default(), PartitionKey(3));
        let child = ChildKey::Partition(PartitionKey(9));

        assert_ne!(
            vector_key(&vector_prefix(&metadata, Level::LEAF), &child),
            vector_key(&vector_prefix(&metadata, Level(2)), &child)
        );
    }

    #[test]
    fn it_decodes_child_keys_by_level() -> anyhow::Result<()> {
        let mut encoded = Vec::new();
        encode_child_key(&mut encoded, &ChildKey::Partition(PartitionKey(1000)));

        assert_eq!(
            decode_child_key(&encoded, Level(2))?,
            ChildKey::Partition(PartitionKey(1000))
        );
        assert_eq!(
            decode_child_key(&encoded, Level::LEAF)?,
            ChildKey::Primary(encoded.clone())
        );

        encoded.push(0);
        assert!(decode_child_key(&encoded, Level(2)).is_err());

        Ok(())
    }

    proptest! {
        #[test]
        fn uvarint_order_matches_numeric_order(a in any::<u64>(), b in any::<u64>()) {
            prop_assert_eq!(a.cmp(&b), uvarint(a).cmp(&uvarint(b)));
            let encoded = uvarint(a);
            let (decoded, rest) = decode_uvarint(&encoded).unwrap();
            prop_assert_eq!(decoded, a);
            prop_assert!(rest.is_empty());
        }

        #[test]
        fn byte_string_order_matches_input_order(
            a in proptest::collection::vec(any::<u8>(), 0..8),
            b in proptest::collection::vec(any::<u8>(), 0..8),
        ) {
            let mut left = Vec::new();
            let mut right = Vec::new();
            encode_bytes(&mut left, &a);
            encode_bytes(&mut right, &b);
            prop_assert_eq!(a.cmp(&b), left.cmp(&right));
        }

        #[test]
        fn partition_ranges_never_overlap(
            tree in proptest::collection::vec(any::<u8>(), 0..4),
            a in any::<u64>(),
            b in any::<u64>(),
        ) {
            prop_assume!(a != b);
            let tree = TreeKey::new(tree);
            let (low, high) = if a < b { (a, b) } else { (b, a) };
            let low = metadata_key(&[7], &tree, PartitionKey(low));
            let high = metadata_key(&[7], &tree, PartitionKey(high));

            prop_assert!(low < high);
            prop_assert!(end_key(&low) <= high);
        }
    }
}
