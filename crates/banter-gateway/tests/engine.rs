//! End-to-end engine tests: in-memory store, recording transport, real
//! broadcaster task.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use banter_gateway::broadcast::Broadcaster;
use banter_gateway::delivery::{DeliveryChannel, PushTransport, TransportError};
use banter_gateway::ingest::MessageIngest;
use banter_gateway::lifecycle::Lifecycle;
use banter_gateway::subscriptions::SubscriptionManager;
use banter_store::EntityStore;
use banter_types::events::PushEvent;
use banter_types::records::TransportConfig;

/// Records every delivered payload; connections marked gone fail permanently.
#[derive(Default)]
struct RecordingTransport {
    pushes: Mutex<Vec<(Uuid, PushEvent)>>,
    gone: Mutex<HashSet<Uuid>>,
}

impl RecordingTransport {
    fn mark_gone(&self, connection_id: Uuid) {
        self.gone.lock().unwrap().insert(connection_id);
    }

    fn pushes_to(&self, connection_id: Uuid) -> Vec<PushEvent> {
        self.pushes
            .lock()
            .unwrap()
            .iter()
            .filter(|(recipient, _)| *recipient == connection_id)
            .map(|(_, event)| event.clone())
            .collect()
    }

    fn clear(&self) {
        self.pushes.lock().unwrap().clear();
    }
}

#[async_trait]
impl PushTransport for RecordingTransport {
    async fn push(&self, connection_id: Uuid, payload: &str) -> Result<(), TransportError> {
        if self.gone.lock().unwrap().contains(&connection_id) {
            return Err(TransportError::Gone);
        }
        let event: PushEvent = serde_json::from_str(payload).expect("well-formed push payload");
        self.pushes.lock().unwrap().push((connection_id, event));
        Ok(())
    }
}

struct Engine {
    store: Arc<EntityStore>,
    transport: Arc<RecordingTransport>,
    subscriptions: SubscriptionManager,
    ingest: MessageIngest,
    lifecycle: Lifecycle,
}

fn engine() -> Engine {
    let store = Arc::new(EntityStore::open_in_memory().unwrap());
    let transport = Arc::new(RecordingTransport::default());
    let subscriptions = SubscriptionManager::new(store.clone());
    let delivery = DeliveryChannel::new(store.clone(), transport.clone());
    let ingest = MessageIngest::new(store.clone(), subscriptions.clone(), delivery.clone());
    let lifecycle = Lifecycle::new(store.clone(), subscriptions.clone(), "General");

    Engine {
        store,
        transport,
        subscriptions,
        ingest,
        lifecycle,
    }
}

/// Start the broadcaster on the engine's feed. Must be called before the
/// mutations whose notifications the test asserts on.
fn start_broadcaster(engine: &Engine) -> tokio::task::JoinHandle<()> {
    let delivery = DeliveryChannel::new(engine.store.clone(), engine.transport.clone());
    Broadcaster::new(engine.subscriptions.clone(), delivery).start(engine.store.subscribe_feed())
}

/// Give the broadcaster task time to drain the feed.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn transport_config() -> TransportConfig {
    TransportConfig { endpoint: "ws://localhost:4000/gateway".into() }
}

fn channel_messages(events: &[PushEvent]) -> Vec<(&str, &str)> {
    events
        .iter()
        .filter_map(|event| match event {
            PushEvent::ChannelMessage { name, content, .. } => {
                Some((name.as_str(), content.as_str()))
            }
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn message_fans_out_to_everyone_but_the_sender() {
    let engine = engine();
    let sender = Uuid::new_v4();
    let listener = Uuid::new_v4();

    engine.subscriptions.subscribe("General", sender).await.unwrap();
    engine.subscriptions.subscribe("General", listener).await.unwrap();

    engine
        .ingest
        .post_message("General", sender, "alice", "hello there")
        .await;

    let listener_pushes = engine.transport.pushes_to(listener);
    let to_listener = channel_messages(&listener_pushes);
    assert_eq!(to_listener, vec![("alice", "hello there")]);

    let sender_pushes = engine.transport.pushes_to(sender);
    let to_sender = channel_messages(&sender_pushes);
    assert!(to_sender.is_empty(), "sender must not receive its own message");
}

#[tokio::test]
async fn message_content_and_name_are_sanitized() {
    let engine = engine();
    let sender = Uuid::new_v4();
    let listener = Uuid::new_v4();

    engine.subscriptions.subscribe("General", sender).await.unwrap();
    engine.subscriptions.subscribe("General", listener).await.unwrap();

    engine
        .ingest
        .post_message(
            "General",
            sender,
            "al!ce <3",
            "<b>hi</b><script>alert(1)</script>",
        )
        .await;

    let listener_pushes = engine.transport.pushes_to(listener);
    let received = channel_messages(&listener_pushes);
    assert_eq!(received, vec![("alce 3", "<b>hi</b>alert(1)")]);

    // The persisted record holds the sanitized fields too.
    let stored = engine.store.channel_messages("General", 10).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].1.name, "alce 3");
    assert_eq!(stored[0].1.content, "<b>hi</b>alert(1)");
}

#[tokio::test]
async fn subscribe_notifies_current_members_with_count() {
    let engine = engine();
    let _broadcaster = start_broadcaster(&engine);

    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    // Settle between the joins so each notification sees the membership at
    // its own point in feed order.
    engine.subscriptions.subscribe("General", first).await.unwrap();
    settle().await;
    engine.subscriptions.subscribe("General", second).await.unwrap();
    settle().await;

    let to_first = engine.transport.pushes_to(first);
    let subs: Vec<_> = to_first
        .iter()
        .filter_map(|event| match event {
            PushEvent::SubscriberSub { channel_id, count, subscriber_id } => {
                Some((channel_id.as_str(), *count, *subscriber_id))
            }
            _ => None,
        })
        .collect();

    // Own join (count 1), then second's join (count 2).
    assert_eq!(subs, vec![("General", 1, first), ("General", 2, second)]);
}

#[tokio::test]
async fn resubscribe_emits_no_duplicate_notification() {
    let engine = engine();
    let _broadcaster = start_broadcaster(&engine);

    let conn = Uuid::new_v4();
    engine.subscriptions.subscribe("General", conn).await.unwrap();
    settle().await;
    engine.transport.clear();

    engine.subscriptions.subscribe("General", conn).await.unwrap();
    settle().await;

    assert!(engine.transport.pushes_to(conn).is_empty());
}

#[tokio::test]
async fn disconnect_unsubscribes_and_notifies_remaining() {
    let engine = engine();
    let _broadcaster = start_broadcaster(&engine);

    let leaver = Uuid::new_v4();
    let stays = Uuid::new_v4();

    for conn in [leaver, stays] {
        engine.subscriptions.subscribe("alpha", conn).await.unwrap();
        engine.subscriptions.subscribe("beta", conn).await.unwrap();
    }
    settle().await;
    engine.transport.clear();

    engine.lifecycle.disconnect(leaver).await;
    settle().await;

    assert!(
        engine
            .subscriptions
            .connection_channels(leaver)
            .await
            .unwrap()
            .is_empty()
    );

    let mut unsubs: Vec<_> = engine
        .transport
        .pushes_to(stays)
        .iter()
        .filter_map(|event| match event {
            PushEvent::SubscriberUnsub { channel_id, count, subscriber_id } => {
                Some((channel_id.clone(), *count, *subscriber_id))
            }
            _ => None,
        })
        .collect();
    unsubs.sort();

    assert_eq!(
        unsubs,
        vec![("alpha".into(), 1, leaver), ("beta".into(), 1, leaver)]
    );
}

#[tokio::test]
async fn gone_delivery_heals_by_unsubscribing_the_stale_connection() {
    let engine = engine();
    let _broadcaster = start_broadcaster(&engine);

    let stale = Uuid::new_v4();
    let healthy = Uuid::new_v4();

    engine.subscriptions.subscribe("General", stale).await.unwrap();
    engine.subscriptions.subscribe("General", healthy).await.unwrap();
    settle().await;

    // The stale connection dies without an explicit disconnect.
    engine.transport.mark_gone(stale);
    engine.transport.clear();

    // Any delivery attempt discovers it; a message post is the natural one.
    engine
        .ingest
        .post_message("General", healthy, "bob", "anyone home?")
        .await;
    settle().await;

    assert!(
        engine
            .subscriptions
            .connection_channels(stale)
            .await
            .unwrap()
            .is_empty(),
        "gone delivery must drop every subscription of the stale connection"
    );

    // The healed membership change broadcasts like an ordinary unsubscribe.
    let unsubs: Vec<_> = engine
        .transport
        .pushes_to(healthy)
        .iter()
        .filter_map(|event| match event {
            PushEvent::SubscriberUnsub { count, subscriber_id, .. } => {
                Some((*count, *subscriber_id))
            }
            _ => None,
        })
        .collect();
    assert_eq!(unsubs, vec![(1, stale)]);

    // A later join sees the decremented membership.
    engine.transport.clear();
    let newcomer = Uuid::new_v4();
    engine.subscriptions.subscribe("General", newcomer).await.unwrap();
    settle().await;

    let counts: Vec<_> = engine
        .transport
        .pushes_to(healthy)
        .iter()
        .filter_map(|event| match event {
            PushEvent::SubscriberSub { count, .. } => Some(*count),
            _ => None,
        })
        .collect();
    assert_eq!(counts, vec![2]);
    assert!(engine.transport.pushes_to(stale).is_empty());
}

#[tokio::test]
async fn fresh_connect_lands_in_the_default_channel_and_hears_messages() {
    let engine = engine();
    let _broadcaster = start_broadcaster(&engine);

    let poster = Uuid::new_v4();
    engine.subscriptions.subscribe("General", poster).await.unwrap();
    settle().await;

    // A brand-new connection with no prior state.
    let newcomer = Uuid::new_v4();
    engine
        .lifecycle
        .connect(newcomer, &transport_config())
        .await
        .unwrap();
    settle().await;
    engine.transport.clear();

    engine
        .ingest
        .post_message("General", poster, "Eve<>", "<i>welcome</i>")
        .await;

    let newcomer_pushes = engine.transport.pushes_to(newcomer);
    let received = channel_messages(&newcomer_pushes);
    assert_eq!(received, vec![("Eve", "<i>welcome</i>")]);
    assert!(channel_messages(&engine.transport.pushes_to(poster)).is_empty());
}
