use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::keys::EntityKey;

/// Events pushed to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PushEvent {
    /// A message was posted to a channel the client subscribes to.
    #[serde(rename_all = "camelCase")]
    ChannelMessage {
        channel_id: String,
        name: String,
        content: String,
    },

    /// A connection joined a channel. `count` is the channel's subscriber
    /// count after the change; `subscriber_id` is who joined.
    #[serde(rename_all = "camelCase")]
    SubscriberSub {
        channel_id: String,
        count: usize,
        subscriber_id: Uuid,
    },

    /// A connection left a channel.
    #[serde(rename_all = "camelCase")]
    SubscriberUnsub {
        channel_id: String,
        count: usize,
        subscriber_id: Uuid,
    },

    /// Sent only to a connection that issued an unrecognized action.
    Error { message: String },
}

impl PushEvent {
    pub fn subscriber_sub(channel_id: String, count: usize, subscriber_id: Uuid) -> Self {
        Self::SubscriberSub { channel_id, count, subscriber_id }
    }

    pub fn subscriber_unsub(channel_id: String, count: usize, subscriber_id: Uuid) -> Self {
        Self::SubscriberUnsub { channel_id, count, subscriber_id }
    }
}

/// Actions sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ClientAction {
    #[serde(rename_all = "camelCase")]
    SubscribeChannel { channel_id: String },

    #[serde(rename_all = "camelCase")]
    UnsubscribeChannel { channel_id: String },

    #[serde(rename_all = "camelCase")]
    SendMessage {
        channel_id: String,
        name: String,
        content: String,
    },
}

/// Kind of a single store mutation, as seen on the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Remove,
}

/// One per-record mutation event emitted by the entity store after commit.
/// Carries key fields only; consumers must re-query for current state.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub partition: EntityKey,
    pub sort: EntityKey,
}

/// Fixed acknowledgment returned by every control-plane operation, regardless
/// of the internal branch taken. Real failures surface via logs or an
/// explicit [`PushEvent::Error`] push, never through this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack;
