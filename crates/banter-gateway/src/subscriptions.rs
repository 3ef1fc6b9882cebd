use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use banter_store::{EntityStore, StoreError};
use banter_types::events::Ack;
use banter_types::keys::{EntityKey, EntityKind};

/// Channel membership mutations. Purely data-mutating: no notification is
/// emitted here -- fan-out belongs to the change-feed broadcaster alone.
#[derive(Clone)]
pub struct SubscriptionManager {
    store: Arc<EntityStore>,
}

impl SubscriptionManager {
    pub fn new(store: Arc<EntityStore>) -> Self {
        Self { store }
    }

    /// Idempotent: re-subscribing an existing pair overwrites the same record
    /// (an Update on the feed, which the broadcaster ignores).
    pub async fn subscribe(&self, channel_id: &str, connection_id: Uuid) -> Result<Ack, StoreError> {
        let store = self.store.clone();
        let channel = EntityKey::channel(channel_id);

        // Run blocking store write off the async runtime
        run_blocking(move || store.put(&channel, &EntityKey::connection(connection_id), &json!({}))).await?;
        Ok(Ack)
    }

    /// No-op if the pair is absent; no error, no feed event.
    pub async fn unsubscribe(&self, channel_id: &str, connection_id: Uuid) -> Result<Ack, StoreError> {
        let store = self.store.clone();
        let channel = EntityKey::channel(channel_id);

        run_blocking(move || store.delete(&channel, &EntityKey::connection(connection_id))).await?;
        Ok(Ack)
    }

    /// Current subscriber set of a channel, fresh from the store.
    pub async fn subscribers(&self, channel_id: &str) -> Result<Vec<Uuid>, StoreError> {
        let store = self.store.clone();
        let channel = EntityKey::channel(channel_id);

        let rows = run_blocking(move || store.query_prefix(&channel, EntityKind::Connection)).await?;
        Ok(rows.iter().filter_map(|row| row.sort.connection_id()).collect())
    }

    /// Every channel the connection currently belongs to, via the reverse
    /// index.
    pub async fn connection_channels(&self, connection_id: Uuid) -> Result<Vec<String>, StoreError> {
        let store = self.store.clone();

        let rows = run_blocking(move || {
            store.query_reverse(&EntityKey::connection(connection_id), EntityKind::Channel)
        })
        .await?;
        Ok(rows.into_iter().map(|row| row.partition.id).collect())
    }
}

async fn run_blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T, StoreError> + Send + 'static,
) -> Result<T, StoreError> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Database(format!("blocking task join: {e}")))?
}
