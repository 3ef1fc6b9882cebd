use std::sync::Arc;

use futures_util::future::join_all;
use tracing::warn;
use uuid::Uuid;

use banter_store::{EntityStore, StoreError};
use banter_types::keys::EntityKey;
use banter_types::records::TransportConfig;

use crate::subscriptions::SubscriptionManager;

/// Connect/disconnect handling. A connection has no record of its own:
/// it exists from its first subscription (created here on connect) until its
/// last one is removed (here on disconnect, or by stale-delivery cleanup).
#[derive(Clone)]
pub struct Lifecycle {
    store: Arc<EntityStore>,
    subscriptions: SubscriptionManager,
    default_channel: String,
}

impl Lifecycle {
    pub fn new(
        store: Arc<EntityStore>,
        subscriptions: SubscriptionManager,
        default_channel: impl Into<String>,
    ) -> Self {
        Self {
            store,
            subscriptions,
            default_channel: default_channel.into(),
        }
    }

    pub fn default_channel(&self) -> &str {
        &self.default_channel
    }

    /// Hydrate-or-create the persisted delivery config, then auto-subscribe
    /// the connection to the default channel. Returns the transport config
    /// value for this execution; callers pass it where needed instead of
    /// caching it globally.
    pub async fn connect(
        &self,
        connection_id: Uuid,
        fallback: &TransportConfig,
    ) -> Result<TransportConfig, StoreError> {
        let config = self.hydrate_transport_config(fallback).await?;
        self.subscriptions
            .subscribe(&self.default_channel, connection_id)
            .await?;
        Ok(config)
    }

    /// Explicitly unsubscribe the connection everywhere, concurrently. Not
    /// left to lazy stale-delivery cleanup.
    pub async fn disconnect(&self, connection_id: Uuid) {
        let channels = match self.subscriptions.connection_channels(connection_id).await {
            Ok(channels) => channels,
            Err(e) => {
                warn!("subscription lookup for {connection_id} on disconnect failed: {e}");
                return;
            }
        };

        let unsubscribes = channels.iter().map(|channel_id| async move {
            if let Err(e) = self.subscriptions.unsubscribe(channel_id, connection_id).await {
                warn!("unsubscribing {connection_id} from {channel_id} failed: {e}");
            }
        });
        join_all(unsubscribes).await;
    }

    /// Read the singleton config record, seeding it from `fallback` on the
    /// very first connect.
    async fn hydrate_transport_config(
        &self,
        fallback: &TransportConfig,
    ) -> Result<TransportConfig, StoreError> {
        let store = self.store.clone();
        let fallback = fallback.clone();

        tokio::task::spawn_blocking(move || {
            let partition = EntityKey::application();
            let sort = EntityKey::transport_config();

            if let Some(row) = store.get(&partition, &sort)? {
                match serde_json::from_value(row.body) {
                    Ok(config) => return Ok(config),
                    Err(e) => warn!("corrupt transport config record, reseeding: {e}"),
                }
            }

            let body = serde_json::to_value(&fallback)
                .map_err(|e| StoreError::Database(format!("transport config: {e}")))?;
            store.put(&partition, &sort, &body)?;
            Ok(fallback)
        })
        .await
        .map_err(|e| StoreError::Database(format!("blocking task join: {e}")))?
    }
}
