use futures_util::future::join_all;
use tokio::sync::broadcast;
use tracing::{info, warn};

use banter_types::events::{ChangeEvent, ChangeKind, PushEvent};
use banter_types::keys::EntityKind;

use crate::delivery::DeliveryChannel;
use crate::subscriptions::SubscriptionManager;

/// Consumes the store's change feed, classifies each mutation by the entity
/// tags in its keys, and fans out membership notifications.
///
/// Events are handled one at a time in feed order, so notifications for
/// distinct mutations observe commit order. Fan-out to the recipients of one
/// event is concurrent and unordered.
pub struct Broadcaster {
    subscriptions: SubscriptionManager,
    delivery: DeliveryChannel,
}

impl Broadcaster {
    pub fn new(subscriptions: SubscriptionManager, delivery: DeliveryChannel) -> Self {
        Self {
            subscriptions,
            delivery,
        }
    }

    /// Start the feed consumer task.
    pub fn start(self, mut feed: broadcast::Receiver<ChangeEvent>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(event) => self.handle_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "change feed lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("change feed closed");
                        break;
                    }
                }
            }
        })
    }

    async fn handle_event(&self, event: ChangeEvent) {
        // Only channel-scoped records matter; this skips e.g. the singleton
        // delivery-config writes under the Application partition.
        if event.partition.kind != EntityKind::Channel {
            return;
        }

        match event.sort.kind {
            EntityKind::Connection => self.membership_changed(event).await,
            EntityKind::Message => {
                // Inserts were already fanned out synchronously at ingestion.
                // A message written to the store by any other producer is
                // deliberately not broadcast here.
            }
            _ => {}
        }
    }

    async fn membership_changed(&self, event: ChangeEvent) {
        let make_push = match event.kind {
            ChangeKind::Insert => PushEvent::subscriber_sub,
            ChangeKind::Remove => PushEvent::subscriber_unsub,
            // An overwrite of an existing subscription record (idempotent
            // re-subscribe) is not a membership transition.
            ChangeKind::Update => return,
        };

        let Some(subscriber_id) = event.sort.connection_id() else {
            warn!("membership event with malformed connection key: {}", event.sort);
            return;
        };
        let channel_id = event.partition.id;

        // Membership is re-read fresh from the store; the event carries keys
        // only and may be stale under concurrent changes.
        let current = match self.subscriptions.subscribers(&channel_id).await {
            Ok(current) => current,
            Err(e) => {
                warn!("subscriber query for {channel_id} failed: {e}");
                return;
            }
        };

        let push = make_push(channel_id, current.len(), subscriber_id);
        let sends = current
            .iter()
            .map(|recipient| self.delivery.send(*recipient, &push));
        join_all(sends).await;
    }
}
