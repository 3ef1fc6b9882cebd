use std::fmt;

use uuid::Uuid;

/// Entity kinds stored in the single `entities` table.
/// Every key carries its kind explicitly so the record type can be recovered
/// from the key alone, without parsing conventions out of the raw id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Application,
    Channel,
    Connection,
    Message,
}

impl EntityKind {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Application => "APPLICATION",
            Self::Channel => "CHANNEL",
            Self::Connection => "CONNECTION",
            Self::Message => "MESSAGE",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "APPLICATION" => Some(Self::Application),
            "CHANNEL" => Some(Self::Channel),
            "CONNECTION" => Some(Self::Connection),
            "MESSAGE" => Some(Self::Message),
            _ => None,
        }
    }
}

/// A typed composite-key component: `{kind, id}`, stored as `KIND|id`.
///
/// Encode and decode are symmetric. Decode splits on the first `|` only, so
/// an id containing the separator round-trips intact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }

    pub fn channel(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Channel, id)
    }

    pub fn connection(id: Uuid) -> Self {
        Self::new(EntityKind::Connection, id.to_string())
    }

    pub fn message(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Message, id)
    }

    /// Partition key of the singleton delivery-config record.
    pub fn application() -> Self {
        Self::new(EntityKind::Application, "singleton")
    }

    /// Sort key of the singleton delivery-config record.
    pub fn transport_config() -> Self {
        Self::new(EntityKind::Application, "transport")
    }

    pub fn encode(&self) -> String {
        format!("{}|{}", self.kind.tag(), self.id)
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let (tag, id) = raw.split_once('|')?;
        Some(Self::new(EntityKind::from_tag(tag)?, id))
    }

    /// The connection id carried by a Connection key, if well-formed.
    pub fn connection_id(&self) -> Option<Uuid> {
        if self.kind != EntityKind::Connection {
            return None;
        }
        self.id.parse().ok()
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let key = EntityKey::channel("General");
        assert_eq!(key.encode(), "CHANNEL|General");
        assert_eq!(EntityKey::decode("CHANNEL|General"), Some(key));
    }

    #[test]
    fn kind_recovered_from_key_alone() {
        let conn = Uuid::new_v4();
        let key = EntityKey::connection(conn);
        let decoded = EntityKey::decode(&key.encode()).unwrap();
        assert_eq!(decoded.kind, EntityKind::Connection);
        assert_eq!(decoded.connection_id(), Some(conn));
    }

    #[test]
    fn id_containing_separator_survives() {
        let key = EntityKey::channel("a|b");
        assert_eq!(EntityKey::decode(&key.encode()), Some(key));
    }

    #[test]
    fn unknown_tag_rejected() {
        assert_eq!(EntityKey::decode("WIDGET|1"), None);
        assert_eq!(EntityKey::decode("no-separator"), None);
    }

    #[test]
    fn connection_id_requires_connection_kind() {
        let key = EntityKey::channel("General");
        assert_eq!(key.connection_id(), None);
    }
}
