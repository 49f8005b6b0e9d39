use async_trait::async_trait;
use storage::{BackfillAtom, Castime, Mutation, MutationResult, OrderToken, ReplTimestamp, Storage, StoreError};

/// The store that sequenced operations are applied to.
///
/// Each call is a single atomic mutation. Implementations serialise
/// concurrent calls touching the same key themselves.
#[async_trait]
pub trait TargetStore: Send + Sync + 'static {
    async fn delete_all_keys_for_backfill(&self, token: OrderToken) -> Result<(), StoreError>;

    async fn backfill_delete(&self, key: &str, token: OrderToken) -> Result<(), StoreError>;

    async fn backfill_set(&self, atom: BackfillAtom, token: OrderToken) -> Result<(), StoreError>;

    /// Record a replication timestamp (end of backfill, or a time barrier)
    async fn set_replication_clock(&self, timestamp: ReplTimestamp, token: OrderToken) -> Result<(), StoreError>;

    async fn change(
        &self,
        mutation: &Mutation,
        castime: Castime,
        token: OrderToken,
    ) -> Result<MutationResult, StoreError>;
}

#[async_trait]
impl TargetStore for Storage {
    async fn delete_all_keys_for_backfill(&self, _token: OrderToken) -> Result<(), StoreError> {
        self.delete_all_keys().await;
        Ok(())
    }

    async fn backfill_delete(&self, key: &str, _token: OrderToken) -> Result<(), StoreError> {
        Storage::backfill_delete(self, key).await
    }

    async fn backfill_set(&self, atom: BackfillAtom, _token: OrderToken) -> Result<(), StoreError> {
        Storage::backfill_set(self, atom).await
    }

    async fn set_replication_clock(&self, timestamp: ReplTimestamp, _token: OrderToken) -> Result<(), StoreError> {
        Storage::set_replication_clock(self, timestamp).await;
        Ok(())
    }

    async fn change(
        &self,
        mutation: &Mutation,
        castime: Castime,
        _token: OrderToken,
    ) -> Result<MutationResult, StoreError> {
        Storage::change(self, mutation, castime).await
    }
}
