use serde::{Deserialize, Serialize};

use crate::KvError;

/// Keys are arbitrary, lexicographically ordered byte strings
pub type Key = Vec<u8>;

/// Values are opaque byte strings
pub type Value = Vec<u8>;

/// A key paired with the value stored against it, as returned by scans
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValue {
    /// The key of the row
    pub key: Key,
    /// The value of the row
    pub value: Value,
}

/// How strongly the reads of a batch are ordered with respect to concurrent
/// writers. Variants are ordered from weakest to strongest.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ReadConsistency {
    /// Reads may observe arbitrarily stale data, and never wait on or
    /// interfere with writers
    Inconsistent,
    /// Reads observe the latest data, including data that is not yet
    /// committed
    ReadUncommitted,
    /// Reads are serializable with respect to all transactions
    #[default]
    Consistent,
}

/// How hard a backend must try to hold a shared lock
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockDurability {
    /// The lock may be lost (e.g. on leaseholder change); the enclosing
    /// transaction still detects conflicting writes when it commits
    BestEffort,
    /// The lock is held until the transaction finishes
    Guaranteed,
}

/// A single operation within a [Batch]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// Read the value at a key
    Get {
        /// The key to read
        key: Key,
    },
    /// Read the value at a key and take a shared lock on it for the
    /// remainder of the transaction
    GetForShare {
        /// The key to read and lock
        key: Key,
        /// How the lock is held
        durability: LockDurability,
    },
    /// Read every row in `[start, end)`
    Scan {
        /// Inclusive lower bound
        start: Key,
        /// Exclusive upper bound
        end: Key,
    },
    /// Unconditionally write a value
    Put {
        /// The key to write
        key: Key,
        /// The value to write
        value: Value,
    },
    /// Write a value only if the key currently holds `expected` (`None`
    /// meaning the key must be absent)
    CPut {
        /// The key to write
        key: Key,
        /// The value to write
        value: Value,
        /// The value the key must currently hold
        expected: Option<Value>,
    },
    /// Delete a key, reporting whether it was present
    Del {
        /// The key to delete
        key: Key,
    },
    /// Delete every row in `[start, end)`
    DelRange {
        /// Inclusive lower bound
        start: Key,
        /// Exclusive upper bound
        end: Key,
        /// Whether the deleted keys are reported back
        return_keys: bool,
    },
}

/// The kind of a [Request], without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// [Request::Get]
    Get,
    /// [Request::GetForShare]
    GetForShare,
    /// [Request::Scan]
    Scan,
    /// [Request::Put]
    Put,
    /// [Request::CPut]
    CPut,
    /// [Request::Del]
    Del,
    /// [Request::DelRange]
    DelRange,
}

impl Request {
    /// The kind of this request
    pub fn operation(&self) -> Operation {
        match self {
            Request::Get { .. } => Operation::Get,
            Request::GetForShare { .. } => Operation::GetForShare,
            Request::Scan { .. } => Operation::Scan,
            Request::Put { .. } => Operation::Put,
            Request::CPut { .. } => Operation::CPut,
            Request::Del { .. } => Operation::Del,
            Request::DelRange { .. } => Operation::DelRange,
        }
    }

    /// The key (or start key, for ranged requests) this request addresses
    pub fn key(&self) -> &[u8] {
        match self {
            Request::Get { key }
            | Request::GetForShare { key, .. }
            | Request::Put { key, .. }
            | Request::CPut { key, .. }
            | Request::Del { key } => key,
            Request::Scan { start, .. } | Request::DelRange { start, .. } => start,
        }
    }

    /// True if this request may modify the store
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Request::Put { .. } | Request::CPut { .. } | Request::Del { .. } | Request::DelRange { .. }
        )
    }
}

/// An ordered group of [Request]s that a backend executes atomically
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch {
    requests: Vec<Request>,
    read_consistency: ReadConsistency,
}

impl Batch {
    /// Create an empty batch with [ReadConsistency::Consistent] reads
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the read consistency of this batch
    pub fn with_read_consistency(mut self, read_consistency: ReadConsistency) -> Self {
        self.read_consistency = read_consistency;
        self
    }

    /// The read consistency of this batch
    pub fn read_consistency(&self) -> ReadConsistency {
        self.read_consistency
    }

    /// Queue a [Request::Get]
    pub fn get(&mut self, key: Key) -> &mut Self {
        self.push(Request::Get { key })
    }

    /// Queue a [Request::GetForShare]
    pub fn get_for_share(&mut self, key: Key, durability: LockDurability) -> &mut Self {
        self.push(Request::GetForShare { key, durability })
    }

    /// Queue a [Request::Scan]
    pub fn scan(&mut self, start: Key, end: Key) -> &mut Self {
        self.push(Request::Scan { start, end })
    }

    /// Queue a [Request::Put]
    pub fn put(&mut self, key: Key, value: Value) -> &mut Self {
        self.push(Request::Put { key, value })
    }

    /// Queue a [Request::CPut]
    pub fn cput(&mut self, key: Key, value: Value, expected: Option<Value>) -> &mut Self {
        self.push(Request::CPut {
            key,
            value,
            expected,
        })
    }

    /// Queue a [Request::Del]
    pub fn del(&mut self, key: Key) -> &mut Self {
        self.push(Request::Del { key })
    }

    /// Queue a [Request::DelRange]
    pub fn del_range(&mut self, start: Key, end: Key, return_keys: bool) -> &mut Self {
        self.push(Request::DelRange {
            start,
            end,
            return_keys,
        })
    }

    /// The queued requests, in order
    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    /// The number of queued requests
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// True if no requests are queued
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    fn push(&mut self, request: Request) -> &mut Self {
        self.requests.push(request);
        self
    }
}

/// The outcome of a single [Request]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestResult {
    /// The value read by [Request::Get] or [Request::GetForShare]
    Get(Option<Value>),
    /// The rows read by [Request::Scan], in key order
    Scan(Vec<KeyValue>),
    /// [Request::Put] or [Request::CPut] succeeded
    Put,
    /// [Request::Del] completed
    Del {
        /// Whether the key was present before the delete
        found_key: bool,
    },
    /// [Request::DelRange] completed
    DelRange {
        /// The deleted keys, if they were requested
        keys: Vec<Key>,
    },
}

/// The results of a [Batch], one per request and in request order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchResponse {
    /// Per-request results
    pub results: Vec<RequestResult>,
}

impl BatchResponse {
    /// The value read by the point read at `index`
    pub fn value(&self, index: usize) -> Result<Option<&Value>, KvError> {
        match self.result(index)? {
            RequestResult::Get(value) => Ok(value.as_ref()),
            other => Err(unexpected(index, "point read", other)),
        }
    }

    /// The rows read by the scan at `index`
    pub fn rows(&self, index: usize) -> Result<&[KeyValue], KvError> {
        match self.result(index)? {
            RequestResult::Scan(rows) => Ok(rows),
            other => Err(unexpected(index, "scan", other)),
        }
    }

    /// Whether the delete at `index` found its key
    pub fn found_key(&self, index: usize) -> Result<bool, KvError> {
        match self.result(index)? {
            RequestResult::Del { found_key } => Ok(*found_key),
            other => Err(unexpected(index, "delete", other)),
        }
    }

    /// The keys removed by the ranged delete at `index`
    pub fn deleted_keys(&self, index: usize) -> Result<&[Key], KvError> {
        match self.result(index)? {
            RequestResult::DelRange { keys } => Ok(keys),
            other => Err(unexpected(index, "ranged delete", other)),
        }
    }

    fn result(&self, index: usize) -> Result<&RequestResult, KvError> {
        self.results
            .get(index)
            .ok_or_else(|| KvError::UnexpectedResponse {
                index,
                reason: format!("only {} results available", self.results.len()),
            })
    }
}

fn unexpected(index: usize, wanted: &str, found: &RequestResult) -> KvError {
    KvError::UnexpectedResponse {
        index,
        reason: format!("expected {wanted} result, found {found:?}"),
    }
}
