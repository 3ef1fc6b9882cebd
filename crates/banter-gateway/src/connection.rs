use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use banter_store::EntityStore;
use banter_types::events::{Ack, ClientAction, PushEvent};
use banter_types::records::TransportConfig;

use crate::delivery::DeliveryChannel;
use crate::ingest::MessageIngest;
use crate::lifecycle::Lifecycle;
use crate::registry::ConnectionRegistry;
use crate::subscriptions::SubscriptionManager;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Everything one connection needs, wired once at startup.
#[derive(Clone)]
pub struct Gateway {
    pub registry: ConnectionRegistry,
    pub subscriptions: SubscriptionManager,
    pub ingest: MessageIngest,
    pub lifecycle: Lifecycle,
    pub delivery: DeliveryChannel,
    pub transport_fallback: TransportConfig,
}

impl Gateway {
    pub fn new(
        store: Arc<EntityStore>,
        registry: ConnectionRegistry,
        default_channel: impl Into<String>,
        transport_fallback: TransportConfig,
    ) -> Self {
        let subscriptions = SubscriptionManager::new(store.clone());
        let delivery = DeliveryChannel::new(store.clone(), Arc::new(registry.clone()));
        let ingest = MessageIngest::new(store.clone(), subscriptions.clone(), delivery.clone());
        let lifecycle = Lifecycle::new(store, subscriptions.clone(), default_channel);

        Self {
            registry,
            subscriptions,
            ingest,
            lifecycle,
            delivery,
            transport_fallback,
        }
    }
}

/// Handle a single WebSocket connection: register it with the transport,
/// run connect bookkeeping, pump frames both ways, then tear down.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway) {
    let connection_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    let mut outbound = gateway.registry.register(connection_id).await;
    info!("{connection_id} connected to gateway");

    if let Err(e) = gateway
        .lifecycle
        .connect(connection_id, &gateway.transport_fallback)
        .await
    {
        warn!("connect bookkeeping for {connection_id} failed: {e}");
    }

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued pushes -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                payload = outbound.recv() => {
                    let Some(payload) = payload else { break };
                    if sender.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("heartbeat timeout (missed {missed_heartbeats} pongs), dropping connection");
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read actions from client
    let dispatch = gateway.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_action(&dispatch, connection_id, &text).await;
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.lifecycle.disconnect(connection_id).await;
    gateway.registry.deregister(connection_id).await;
    info!("{connection_id} disconnected from gateway");
}

/// Dispatch one inbound action. Every branch acknowledges; an unrecognized
/// action earns the offending connection an explicit error push, nothing
/// more.
async fn handle_action(gateway: &Gateway, connection_id: Uuid, raw: &str) -> Ack {
    match serde_json::from_str::<ClientAction>(raw) {
        Ok(ClientAction::SubscribeChannel { channel_id }) => {
            if let Err(e) = gateway.subscriptions.subscribe(&channel_id, connection_id).await {
                warn!("subscribe {connection_id} -> {channel_id} failed: {e}");
            }
        }
        Ok(ClientAction::UnsubscribeChannel { channel_id }) => {
            if let Err(e) = gateway
                .subscriptions
                .unsubscribe(&channel_id, connection_id)
                .await
            {
                warn!("unsubscribe {connection_id} -> {channel_id} failed: {e}");
            }
        }
        Ok(ClientAction::SendMessage {
            channel_id,
            name,
            content,
        }) => {
            gateway
                .ingest
                .post_message(&channel_id, connection_id, &name, &content)
                .await;
        }
        Err(e) => {
            warn!("{connection_id} bad action: {e}");
            gateway
                .delivery
                .send(
                    connection_id,
                    &PushEvent::Error {
                        message: "invalid action type".into(),
                    },
                )
                .await;
        }
    }

    Ack
}
