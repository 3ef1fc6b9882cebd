use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::delivery::{PushTransport, TransportError};

/// In-process push transport: one outbound channel per live connection.
/// A connection that was never registered, or whose receiver has been
/// dropped, is permanently gone.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<Uuid, mpsc::UnboundedSender<String>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a connection. Returns the receiver the socket task drains.
    pub async fn register(&self, connection_id: Uuid) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().await.insert(connection_id, tx);
        rx
    }

    pub async fn deregister(&self, connection_id: Uuid) {
        self.inner.write().await.remove(&connection_id);
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushTransport for ConnectionRegistry {
    async fn push(&self, connection_id: Uuid, payload: &str) -> Result<(), TransportError> {
        let senders = self.inner.read().await;
        match senders.get(&connection_id) {
            Some(tx) => tx
                .send(payload.to_string())
                .map_err(|_| TransportError::Gone),
            None => Err(TransportError::Gone),
        }
    }
}
