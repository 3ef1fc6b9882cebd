use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::join_all;
use tracing::warn;
use uuid::Uuid;

use banter_store::{EntityStore, StoreError};
use banter_types::events::{Ack, PushEvent};
use banter_types::keys::EntityKey;
use banter_types::records::MessageBody;

use crate::delivery::DeliveryChannel;
use crate::sanitize;
use crate::subscriptions::SubscriptionManager;

/// Same-millisecond tiebreak for message ids. Process-wide; wraps far beyond
/// any realistic per-millisecond volume.
static MESSAGE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Message id: zero-padded unix millis plus a monotonic suffix, so
/// lexicographic sort-key order equals ingestion order within a channel.
fn next_message_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let seq = MESSAGE_SEQ.fetch_add(1, Ordering::Relaxed) % 1_000_000;
    format!("{millis:013}-{seq:06}")
}

/// Validates, persists and fans out posted messages.
///
/// Messages are the one mutation kind pushed synchronously here instead of
/// via the change feed: the payload is already in hand and the post path is
/// latency-sensitive. The broadcaster ignores Message inserts accordingly.
#[derive(Clone)]
pub struct MessageIngest {
    store: Arc<EntityStore>,
    subscriptions: SubscriptionManager,
    delivery: DeliveryChannel,
}

impl MessageIngest {
    pub fn new(
        store: Arc<EntityStore>,
        subscriptions: SubscriptionManager,
        delivery: DeliveryChannel,
    ) -> Self {
        Self {
            store,
            subscriptions,
            delivery,
        }
    }

    /// Always acknowledges. Store or delivery failures are logged and never
    /// surfaced to the caller; sanitization cannot fail.
    pub async fn post_message(
        &self,
        channel_id: &str,
        sender: Uuid,
        name: &str,
        content: &str,
    ) -> Ack {
        let name = sanitize::display_name(name);
        let content = sanitize::content(content);

        if let Err(e) = self.persist(channel_id, sender, &name, &content).await {
            warn!("persisting message on {channel_id} failed: {e}");
        }

        let subscribers = match self.subscriptions.subscribers(channel_id).await {
            Ok(subscribers) => subscribers,
            Err(e) => {
                warn!("subscriber query for {channel_id} failed: {e}");
                return Ack;
            }
        };

        let event = PushEvent::ChannelMessage {
            channel_id: channel_id.to_string(),
            name,
            content,
        };

        // Concurrent fan-out to everyone but the sender; no self-echo.
        let sends = subscribers
            .iter()
            .filter(|subscriber| **subscriber != sender)
            .map(|subscriber| self.delivery.send(*subscriber, &event));
        join_all(sends).await;

        Ack
    }

    async fn persist(
        &self,
        channel_id: &str,
        sender: Uuid,
        name: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        let store = self.store.clone();
        let channel = EntityKey::channel(channel_id);
        let message = EntityKey::message(next_message_id());
        let body = serde_json::to_value(MessageBody {
            sender_id: sender,
            name: name.to_string(),
            content: content.to_string(),
        })
        .map_err(|e| StoreError::Database(format!("message body: {e}")))?;

        // Run blocking store write off the async runtime
        tokio::task::spawn_blocking(move || store.put(&channel, &message, &body))
            .await
            .map_err(|e| StoreError::Database(format!("blocking task join: {e}")))??;
        Ok(())
    }
}
