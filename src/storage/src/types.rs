use std::time::{Duration, Instant};
use serde::{Deserialize, Serialize};

/// Longest key the store accepts, in bytes
pub const MAX_KEY_SIZE: usize = 250;

/// Tag attached by the origin of an operation.
///
/// The store and the sequencer forward it verbatim; neither orders by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct OrderToken(pub u64);

impl OrderToken {
    /// Token for callers with no ordering requirement
    pub const IGNORE: OrderToken = OrderToken(0);

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for OrderToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Replication clock value, also used as the recency of a stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ReplTimestamp(pub u32);

impl ReplTimestamp {
    pub const DISTANT_PAST: ReplTimestamp = ReplTimestamp(0);

    pub fn next(&self) -> ReplTimestamp {
        ReplTimestamp(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for ReplTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A proposed CAS value paired with the replication timestamp of a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Castime {
    pub proposed_cas: u64,
    pub timestamp: ReplTimestamp,
}

impl Castime {
    pub fn new(proposed_cas: u64, timestamp: ReplTimestamp) -> Self {
        Castime { proposed_cas, timestamp }
    }
}

/// One key as transferred by a backfill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillAtom {
    pub key: String,
    pub value: Vec<u8>,
    pub flags: u32,
    pub exptime: u32,
    pub recency: ReplTimestamp,
    /// Zero when the source never handed out a CAS for this value
    pub cas_or_zero: u64,
}

/// Condition under which a set-family mutation writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetPolicy {
    /// Always write
    Set,
    /// Write only if the key is absent
    Add,
    /// Write only if the key is present
    Replace,
    /// Write only if the key is present and carries this CAS
    Cas(u64),
}

/// Set, add, replace or compare-and-swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SarcMutation {
    pub key: String,
    pub value: Vec<u8>,
    pub flags: u32,
    pub exptime: u32,
    pub policy: SetPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncrDecrKind {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppendPrependKind {
    Append,
    Prepend,
}

/// A realtime mutation as handed to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    GetCas { key: String },
    Sarc(SarcMutation),
    IncrDecr { kind: IncrDecrKind, key: String, amount: u64 },
    AppendPrepend { kind: AppendPrependKind, key: String, data: Vec<u8> },
    Delete { key: String },
}

impl Mutation {
    pub fn key(&self) -> &str {
        match self {
            Mutation::GetCas { key } => key,
            Mutation::Sarc(m) => &m.key,
            Mutation::IncrDecr { key, .. } => key,
            Mutation::AppendPrepend { key, .. } => key,
            Mutation::Delete { key } => key,
        }
    }
}

/// Outcome of a mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationResult {
    Stored,
    NotStored,
    /// CAS mismatch
    Exists,
    NotFound,
    Deleted,
    Value { value: Vec<u8>, flags: u32, cas: u64 },
    Number(u64),
    NotNumeric,
    TooLarge,
}

/// A stored value with its memcached metadata
#[derive(Clone, Debug)]
pub struct StoredValue {
    pub data: Vec<u8>,
    pub flags: u32,
    pub cas: u64,
    pub expires_at: Option<Instant>,
    /// Replication timestamp of the last write
    pub recency: ReplTimestamp,
}

impl StoredValue {
    pub fn new(data: Vec<u8>, flags: u32, exptime: u32, recency: ReplTimestamp) -> Self {
        StoredValue {
            data,
            flags,
            cas: 0,
            expires_at: expiry_from(exptime),
            recency,
        }
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    pub fn from_atom(atom: BackfillAtom) -> Self {
        StoredValue::new(atom.value, atom.flags, atom.exptime, atom.recency).with_cas(atom.cas_or_zero)
    }

    pub fn is_expired(&self) -> bool {
        if let Some(expires_at) = self.expires_at {
            Instant::now() > expires_at
        } else {
            false
        }
    }
}

fn expiry_from(exptime: u32) -> Option<Instant> {
    if exptime == 0 {
        None
    } else {
        Some(Instant::now() + Duration::from_secs(exptime as u64))
    }
}
