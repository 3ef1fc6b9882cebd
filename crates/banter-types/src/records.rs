use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of a persisted message record. The message id (and therefore its
/// position within the channel) lives in the sort key, not the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBody {
    pub sender_id: Uuid,
    pub name: String,
    pub content: String,
}

/// Body of the singleton delivery-config record: the transport endpoint
/// descriptor advertised to connecting clients. Hydrated or created on the
/// first connect, then re-read on every execution rather than cached globally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    pub endpoint: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_body_wire_shape() {
        let body = MessageBody {
            sender_id: Uuid::nil(),
            name: "alice".into(),
            content: "hi".into(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["name"], "alice");
        assert_eq!(json["content"], "hi");
    }

    #[test]
    fn transport_config_round_trip() {
        let config = TransportConfig { endpoint: "ws://localhost:4000/gateway".into() };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<TransportConfig>(&json).unwrap(), config);
    }
}
