use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use banter_store::{EntityStore, StoreError};
use banter_types::events::PushEvent;
use banter_types::keys::{EntityKey, EntityKind};

#[derive(Debug, Error)]
pub enum TransportError {
    /// The addressed connection no longer exists. Permanent.
    #[error("recipient gone")]
    Gone,

    /// Anything else. Logged, never retried.
    #[error("transient delivery failure: {0}")]
    Transient(String),
}

/// Seam between the engine and whatever actually carries payloads to a
/// connection. The production implementation is the in-process
/// [`crate::registry::ConnectionRegistry`]; tests substitute a recorder.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn push(&self, connection_id: Uuid, payload: &str) -> Result<(), TransportError>;
}

/// Addresses a connection by id and pushes one payload, best-effort.
///
/// A transient failure is logged and swallowed. A Gone failure additionally
/// deletes every subscription referencing the connection -- a missed explicit
/// disconnect is healed at delivery time instead.
#[derive(Clone)]
pub struct DeliveryChannel {
    store: Arc<EntityStore>,
    transport: Arc<dyn PushTransport>,
}

impl DeliveryChannel {
    pub fn new(store: Arc<EntityStore>, transport: Arc<dyn PushTransport>) -> Self {
        Self { store, transport }
    }

    /// Send settles only once any Gone cleanup has completed; it never
    /// returns an error to the caller.
    pub async fn send(&self, connection_id: Uuid, event: &PushEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!("unserializable push event: {e}");
                return;
            }
        };

        match self.transport.push(connection_id, &payload).await {
            Ok(()) => {}
            Err(TransportError::Transient(reason)) => {
                warn!("delivery to {connection_id} failed: {reason}");
            }
            Err(TransportError::Gone) => {
                warn!("found stale connection {connection_id}, unsubscribing it everywhere");
                self.cleanup_stale(connection_id).await;
            }
        }
    }

    /// Treat a gone connection as an implicit disconnect: drop all of its
    /// subscriptions via the reverse index.
    async fn cleanup_stale(&self, connection_id: Uuid) {
        let store = self.store.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<usize, StoreError> {
            let connection = EntityKey::connection(connection_id);
            let rows = store.query_reverse(&connection, EntityKind::Channel)?;
            let mut removed = 0;
            for row in &rows {
                if store.delete(&row.partition, &row.sort)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })
        .await;

        match result {
            Ok(Ok(removed)) => {
                warn!("stale connection {connection_id}: removed {removed} subscriptions");
            }
            Ok(Err(e)) => warn!("stale cleanup for {connection_id} failed: {e}"),
            Err(e) => error!("stale cleanup task for {connection_id} panicked: {e}"),
        }
    }
}
