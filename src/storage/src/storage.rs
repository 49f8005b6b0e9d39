use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use log::{debug, info};

use crate::config::StorageConfig;
use crate::error::StoreError;
use crate::types::{
    AppendPrependKind, BackfillAtom, Castime, IncrDecrKind, Mutation, MutationResult,
    ReplTimestamp, SarcMutation, SetPolicy, StoredValue, MAX_KEY_SIZE,
};

/// In-memory key-value store that replicated writes are applied to.
///
/// Values carry memcached metadata (flags, expiry, CAS) plus the
/// replication timestamp of their last write. The store also keeps a
/// replication clock, advanced by time barriers and by the end of a
/// backfill.
///
/// Cloning is cheap; clones share the same data.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<RwLock<Inner>>,
    config: Arc<StorageConfig>,
}

struct Inner {
    keys: HashMap<String, StoredValue>,
    clock: ReplTimestamp,
}

impl Storage {
    /// Create an empty store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(StorageConfig::default())
    }

    /// Create an empty store.
    pub fn with_config(config: StorageConfig) -> Self {
        info!("Initializing in-memory storage (max_value_size={})", config.max_value_size);
        Storage {
            inner: Arc::new(RwLock::new(Inner {
                keys: HashMap::new(),
                clock: ReplTimestamp::DISTANT_PAST,
            })),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Get a live value by key.
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    pub async fn get(&self, key: &str) -> Option<StoredValue> {
        let inner = self.inner.read().await;
        inner.keys.get(key).filter(|v| !v.is_expired()).cloned()
    }

    /// Apply a realtime mutation.
    ///
    /// Follows the memcached verbs: `Add` only writes an absent key,
    /// `Replace` and `Cas` only a present one, and a `Cas` whose expected
    /// value differs from the stored CAS answers `Exists`. Increments wrap,
    /// decrements stop at zero. Expired entries behave as absent.
    ///
    /// Every write records `castime.proposed_cas` as the new CAS and
    /// `castime.timestamp` as the recency of the value. A `GetCas` hands
    /// out `castime.proposed_cas` only if the value has no CAS yet.
    ///
    /// Outcomes such as `NotStored` or `TooLarge` are answers, not errors;
    /// only an invalid key fails the call.
    ///
    /// # Arguments
    ///
    /// * `mutation` - The mutation to apply
    /// * `castime` - CAS to assign and replication timestamp of the write
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// use storage::{Castime, Mutation, MutationResult, ReplTimestamp, SarcMutation, SetPolicy, Storage};
    ///
    /// let storage = Storage::new();
    /// let set = Mutation::Sarc(SarcMutation {
    ///     key: "greeting".to_string(),
    ///     value: b"hello".to_vec(),
    ///     flags: 0,
    ///     exptime: 0,
    ///     policy: SetPolicy::Set,
    /// });
    /// let result = storage.change(&set, Castime::new(1, ReplTimestamp(7))).await.unwrap();
    /// assert_eq!(result, MutationResult::Stored);
    /// # }
    /// ```
    pub async fn change(&self, mutation: &Mutation, castime: Castime) -> Result<MutationResult, StoreError> {
        validate_key(mutation.key())?;
        let mut inner = self.inner.write().await;
        let keys = &mut inner.keys;

        // Expired entries behave as absent
        if keys.get(mutation.key()).is_some_and(|v| v.is_expired()) {
            keys.remove(mutation.key());
        }

        let result = match mutation {
            Mutation::GetCas { key } => match keys.get_mut(key.as_str()) {
                Some(stored) => {
                    if stored.cas == 0 {
                        stored.cas = castime.proposed_cas;
                    }
                    MutationResult::Value {
                        value: stored.data.clone(),
                        flags: stored.flags,
                        cas: stored.cas,
                    }
                }
                None => MutationResult::NotFound,
            },
            Mutation::Sarc(m) => self.apply_sarc(keys, m, castime),
            Mutation::IncrDecr { kind, key, amount } => {
                let Some(stored) = keys.get_mut(key.as_str()) else {
                    return Ok(MutationResult::NotFound);
                };
                let Some(current) = parse_number(&stored.data) else {
                    return Ok(MutationResult::NotNumeric);
                };
                let next = match kind {
                    IncrDecrKind::Increment => current.wrapping_add(*amount),
                    IncrDecrKind::Decrement => current.saturating_sub(*amount),
                };
                stored.data = next.to_string().into_bytes();
                stored.cas = castime.proposed_cas;
                stored.recency = castime.timestamp;
                MutationResult::Number(next)
            }
            Mutation::AppendPrepend { kind, key, data } => {
                let Some(stored) = keys.get_mut(key.as_str()) else {
                    return Ok(MutationResult::NotStored);
                };
                if stored.data.len() + data.len() > self.config.max_value_size {
                    return Ok(MutationResult::TooLarge);
                }
                match kind {
                    AppendPrependKind::Append => stored.data.extend_from_slice(data),
                    AppendPrependKind::Prepend => {
                        let mut joined = Vec::with_capacity(stored.data.len() + data.len());
                        joined.extend_from_slice(data);
                        joined.extend_from_slice(&stored.data);
                        stored.data = joined;
                    }
                }
                stored.cas = castime.proposed_cas;
                stored.recency = castime.timestamp;
                MutationResult::Stored
            }
            Mutation::Delete { key } => match keys.remove(key.as_str()) {
                Some(_) => MutationResult::Deleted,
                None => MutationResult::NotFound,
            },
        };

        Ok(result)
    }

    fn apply_sarc(
        &self,
        keys: &mut HashMap<String, StoredValue>,
        m: &SarcMutation,
        castime: Castime,
    ) -> MutationResult {
        if m.value.len() > self.config.max_value_size {
            return MutationResult::TooLarge;
        }

        let existing = keys.get(m.key.as_str());
        match (m.policy, existing) {
            (SetPolicy::Add, Some(_)) => return MutationResult::NotStored,
            (SetPolicy::Replace, None) => return MutationResult::NotStored,
            (SetPolicy::Cas(_), None) => return MutationResult::NotFound,
            (SetPolicy::Cas(expected), Some(stored)) if stored.cas != expected => {
                return MutationResult::Exists;
            }
            _ => {}
        }

        let stored = StoredValue::new(m.value.clone(), m.flags, m.exptime, castime.timestamp)
            .with_cas(castime.proposed_cas);
        keys.insert(m.key.clone(), stored);
        MutationResult::Stored
    }

    /// Store a backfilled value, replacing whatever the key held.
    ///
    /// The value keeps the atom's flags, CAS and recency; its expiry is
    /// counted from now. Unlike realtime sets, an oversized backfilled
    /// value is an error: the replica may not silently diverge from its
    /// source.
    ///
    /// # Arguments
    ///
    /// * `atom` - The key and value as transferred by the backfill
    ///
    /// # Errors
    ///
    /// * `StoreError::InvalidKey` - The key is empty or too long
    /// * `StoreError::ValueTooLarge` - The value exceeds `max_value_size`
    pub async fn backfill_set(&self, atom: BackfillAtom) -> Result<(), StoreError> {
        validate_key(&atom.key)?;
        if atom.value.len() > self.config.max_value_size {
            return Err(StoreError::ValueTooLarge {
                key: atom.key,
                size: atom.value.len(),
                max: self.config.max_value_size,
            });
        }

        let mut inner = self.inner.write().await;
        let key = atom.key.clone();
        inner.keys.insert(key, StoredValue::from_atom(atom));
        Ok(())
    }

    /// Remove a key as instructed by a backfill.
    pub async fn backfill_delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        let mut inner = self.inner.write().await;
        inner.keys.remove(key);
        Ok(())
    }

    /// Drop every key before a full backfill.
    pub async fn delete_all_keys(&self) {
        let mut inner = self.inner.write().await;
        let dropped = inner.keys.len();
        inner.keys.clear();
        info!("Cleared {} keys for backfill", dropped);
    }

    /// Advance the replication clock.
    ///
    /// Called when a backfill completes and on realtime time barriers.
    /// The clock never moves backwards; an older timestamp is logged at
    /// debug level and ignored.
    ///
    /// # Arguments
    ///
    /// * `timestamp` - The replication timestamp reached by the source
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// use storage::{ReplTimestamp, Storage};
    ///
    /// let storage = Storage::new();
    /// storage.set_replication_clock(ReplTimestamp(10)).await;
    /// storage.set_replication_clock(ReplTimestamp(4)).await;
    /// assert_eq!(storage.replication_clock().await, ReplTimestamp(10));
    /// # }
    /// ```
    pub async fn set_replication_clock(&self, timestamp: ReplTimestamp) {
        let mut inner = self.inner.write().await;
        if timestamp > inner.clock {
            inner.clock = timestamp;
        } else {
            debug!("Ignoring replication clock regression {} -> {}", inner.clock, timestamp);
        }
    }

    pub async fn replication_clock(&self) -> ReplTimestamp {
        self.inner.read().await.clock
    }

    /// Count all non-expired keys.
    pub async fn keys_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner.keys.values().filter(|v| !v.is_expired()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.keys_count().await == 0
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey("empty key".to_string()));
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(StoreError::InvalidKey(format!(
            "key is {} bytes, limit is {}",
            key.len(),
            MAX_KEY_SIZE
        )));
    }
    Ok(())
}

fn parse_number(data: &[u8]) -> Option<u64> {
    std::str::from_utf8(data).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn castime(cas: u64, ts: u32) -> Castime {
        Castime::new(cas, ReplTimestamp(ts))
    }

    fn set(key: &str, value: &str, policy: SetPolicy) -> Mutation {
        Mutation::Sarc(SarcMutation {
            key: key.to_string(),
            value: value.as_bytes().to_vec(),
            flags: 0,
            exptime: 0,
            policy,
        })
    }

    #[tokio::test]
    async fn test_set_add_replace() {
        let storage = Storage::new();

        assert_eq!(storage.change(&set("k", "a", SetPolicy::Replace), castime(1, 1)).await.unwrap(), MutationResult::NotStored);
        assert_eq!(storage.change(&set("k", "a", SetPolicy::Add), castime(2, 2)).await.unwrap(), MutationResult::Stored);
        assert_eq!(storage.change(&set("k", "b", SetPolicy::Add), castime(3, 3)).await.unwrap(), MutationResult::NotStored);
        assert_eq!(storage.change(&set("k", "c", SetPolicy::Replace), castime(4, 4)).await.unwrap(), MutationResult::Stored);

        let stored = storage.get("k").await.unwrap();
        assert_eq!(stored.data, b"c".to_vec());
        assert_eq!(stored.cas, 4);
        assert_eq!(stored.recency, ReplTimestamp(4));
    }

    #[tokio::test]
    async fn test_cas() {
        let storage = Storage::new();

        assert_eq!(storage.change(&set("k", "a", SetPolicy::Cas(7)), castime(1, 1)).await.unwrap(), MutationResult::NotFound);
        storage.change(&set("k", "a", SetPolicy::Set), castime(5, 1)).await.unwrap();
        assert_eq!(storage.change(&set("k", "b", SetPolicy::Cas(7)), castime(6, 2)).await.unwrap(), MutationResult::Exists);
        assert_eq!(storage.change(&set("k", "b", SetPolicy::Cas(5)), castime(6, 2)).await.unwrap(), MutationResult::Stored);
    }

    #[tokio::test]
    async fn test_get_cas_assigns_once() {
        let storage = Storage::new();
        storage
            .backfill_set(BackfillAtom {
                key: "k".to_string(),
                value: b"v".to_vec(),
                flags: 3,
                exptime: 0,
                recency: ReplTimestamp(1),
                cas_or_zero: 0,
            })
            .await
            .unwrap();

        let first = storage.change(&Mutation::GetCas { key: "k".to_string() }, castime(11, 2)).await.unwrap();
        let second = storage.change(&Mutation::GetCas { key: "k".to_string() }, castime(12, 3)).await.unwrap();

        assert_eq!(first, MutationResult::Value { value: b"v".to_vec(), flags: 3, cas: 11 });
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_incr_decr() {
        let storage = Storage::new();
        let incr = |amount| Mutation::IncrDecr { kind: IncrDecrKind::Increment, key: "n".to_string(), amount };
        let decr = |amount| Mutation::IncrDecr { kind: IncrDecrKind::Decrement, key: "n".to_string(), amount };

        assert_eq!(storage.change(&incr(1), castime(1, 1)).await.unwrap(), MutationResult::NotFound);
        storage.change(&set("n", "10", SetPolicy::Set), castime(1, 1)).await.unwrap();
        assert_eq!(storage.change(&incr(5), castime(2, 2)).await.unwrap(), MutationResult::Number(15));
        assert_eq!(storage.change(&decr(20), castime(3, 3)).await.unwrap(), MutationResult::Number(0));

        storage.change(&set("n", "abc", SetPolicy::Set), castime(4, 4)).await.unwrap();
        assert_eq!(storage.change(&incr(1), castime(5, 5)).await.unwrap(), MutationResult::NotNumeric);
    }

    #[tokio::test]
    async fn test_append_prepend() {
        let storage = Storage::with_config(StorageConfig::default().with_max_value_size(8));
        let append = |data: &str| Mutation::AppendPrepend {
            kind: AppendPrependKind::Append,
            key: "k".to_string(),
            data: data.as_bytes().to_vec(),
        };
        let prepend = |data: &str| Mutation::AppendPrepend {
            kind: AppendPrependKind::Prepend,
            key: "k".to_string(),
            data: data.as_bytes().to_vec(),
        };

        assert_eq!(storage.change(&append("x"), castime(1, 1)).await.unwrap(), MutationResult::NotStored);
        storage.change(&set("k", "mid", SetPolicy::Set), castime(1, 1)).await.unwrap();
        storage.change(&append(">"), castime(2, 2)).await.unwrap();
        storage.change(&prepend("<"), castime(3, 3)).await.unwrap();
        assert_eq!(storage.get("k").await.unwrap().data, b"<mid>".to_vec());

        assert_eq!(storage.change(&append("toolong"), castime(4, 4)).await.unwrap(), MutationResult::TooLarge);
        assert_eq!(storage.get("k").await.unwrap().data, b"<mid>".to_vec());
    }

    #[tokio::test]
    async fn test_backfill_ops() {
        let storage = Storage::with_config(StorageConfig::default().with_max_value_size(4));
        let atom = |key: &str, value: &str| BackfillAtom {
            key: key.to_string(),
            value: value.as_bytes().to_vec(),
            flags: 0,
            exptime: 0,
            recency: ReplTimestamp(9),
            cas_or_zero: 42,
        };

        storage.backfill_set(atom("a", "1")).await.unwrap();
        storage.backfill_set(atom("b", "2")).await.unwrap();
        assert_eq!(storage.get("a").await.unwrap().cas, 42);

        let err = storage.backfill_set(atom("c", "too big")).await.unwrap_err();
        assert!(matches!(err, StoreError::ValueTooLarge { size: 7, max: 4, .. }));

        storage.backfill_delete("a").await.unwrap();
        assert!(storage.get("a").await.is_none());
        assert_eq!(storage.keys_count().await, 1);

        storage.delete_all_keys().await;
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_replication_clock_is_monotonic() {
        let storage = Storage::new();

        storage.set_replication_clock(ReplTimestamp(5)).await;
        storage.set_replication_clock(ReplTimestamp(3)).await;
        assert_eq!(storage.replication_clock().await, ReplTimestamp(5));
    }

    #[tokio::test]
    async fn test_invalid_keys() {
        let storage = Storage::new();
        let long_key = "k".repeat(MAX_KEY_SIZE + 1);

        assert!(matches!(storage.backfill_delete("").await, Err(StoreError::InvalidKey(_))));
        assert!(matches!(
            storage.change(&Mutation::Delete { key: long_key }, castime(1, 1)).await,
            Err(StoreError::InvalidKey(_))
        ));
    }
}
