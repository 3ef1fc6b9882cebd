use rusqlite::params;

use banter_types::events::{ChangeEvent, ChangeKind};
use banter_types::keys::{EntityKey, EntityKind};
use banter_types::records::MessageBody;

use crate::{EntityStore, StoreError};

/// One stored record, with both key halves decoded back to typed keys.
#[derive(Debug, Clone)]
pub struct EntityRow {
    pub partition: EntityKey,
    pub sort: EntityKey,
    pub body: serde_json::Value,
}

impl EntityStore {
    /// Idempotent upsert. Emits Insert for a new key, Update for an
    /// overwrite. Last write wins; there is no optimistic concurrency
    /// control.
    pub fn put(
        &self,
        partition: &EntityKey,
        sort: &EntityKey,
        body: &serde_json::Value,
    ) -> Result<ChangeKind, StoreError> {
        let pk = partition.encode();
        let sk = sort.encode();

        // Lock held across SQL and feed emission so feed order matches
        // commit order.
        let conn = self.lock_conn()?;

        let existing: bool = conn
            .query_row(
                "SELECT 1 FROM entities WHERE pk = ?1 AND sk = ?2",
                params![pk, sk],
                |_| Ok(()),
            )
            .map(|_| true)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(false),
                other => Err(StoreError::from(other)),
            })?;

        conn.execute(
            "INSERT INTO entities (pk, sk, body) VALUES (?1, ?2, ?3)
             ON CONFLICT (pk, sk) DO UPDATE SET body = excluded.body",
            params![pk, sk, body.to_string()],
        )?;

        let kind = if existing { ChangeKind::Update } else { ChangeKind::Insert };
        self.emit(ChangeEvent {
            kind,
            partition: partition.clone(),
            sort: sort.clone(),
        });
        Ok(kind)
    }

    /// Delete a record. No-op (and no feed event) if the key is absent.
    /// Returns whether a record was actually removed.
    pub fn delete(&self, partition: &EntityKey, sort: &EntityKey) -> Result<bool, StoreError> {
        let conn = self.lock_conn()?;

        let affected = conn.execute(
            "DELETE FROM entities WHERE pk = ?1 AND sk = ?2",
            params![partition.encode(), sort.encode()],
        )?;

        if affected == 0 {
            return Ok(false);
        }

        self.emit(ChangeEvent {
            kind: ChangeKind::Remove,
            partition: partition.clone(),
            sort: sort.clone(),
        });
        Ok(true)
    }

    /// Point lookup. Absent key is `None`, not an error.
    pub fn get(&self, partition: &EntityKey, sort: &EntityKey) -> Result<Option<EntityRow>, StoreError> {
        let conn = self.lock_conn()?;

        let raw = conn
            .query_row(
                "SELECT pk, sk, body FROM entities WHERE pk = ?1 AND sk = ?2",
                params![partition.encode(), sort.encode()],
                map_row,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StoreError::from(other)),
            })?;

        raw.map(decode_row).transpose()
    }

    /// All records under `partition` whose sort key is of `sort_kind`,
    /// ordered by sort key.
    pub fn query_prefix(
        &self,
        partition: &EntityKey,
        sort_kind: EntityKind,
    ) -> Result<Vec<EntityRow>, StoreError> {
        let conn = self.lock_conn()?;

        let mut stmt = conn.prepare(
            "SELECT pk, sk, body FROM entities
             WHERE pk = ?1 AND sk LIKE ?2 || '%'
             ORDER BY sk",
        )?;

        let rows = stmt
            .query_map(
                params![partition.encode(), format!("{}|", sort_kind.tag())],
                map_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(decode_row).collect()
    }

    /// Reverse-index query: all records whose sort key equals `sort` and
    /// whose partition key is of `partition_kind`, ordered by partition key.
    /// This is how "every channel this connection belongs to" is answered
    /// without a scan.
    pub fn query_reverse(
        &self,
        sort: &EntityKey,
        partition_kind: EntityKind,
    ) -> Result<Vec<EntityRow>, StoreError> {
        let conn = self.lock_conn()?;

        let mut stmt = conn.prepare(
            "SELECT pk, sk, body FROM entities
             WHERE sk = ?1 AND pk LIKE ?2 || '%'
             ORDER BY pk",
        )?;

        let rows = stmt
            .query_map(
                params![sort.encode(), format!("{}|", partition_kind.tag())],
                map_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(decode_row).collect()
    }

    /// Most recent messages in a channel, newest first.
    pub fn channel_messages(
        &self,
        channel_id: &str,
        limit: u32,
    ) -> Result<Vec<(EntityKey, MessageBody)>, StoreError> {
        let conn = self.lock_conn()?;

        let mut stmt = conn.prepare(
            "SELECT pk, sk, body FROM entities
             WHERE pk = ?1 AND sk LIKE ?2 || '%'
             ORDER BY sk DESC
             LIMIT ?3",
        )?;

        let rows = stmt
            .query_map(
                params![
                    EntityKey::channel(channel_id).encode(),
                    format!("{}|", EntityKind::Message.tag()),
                    limit
                ],
                map_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|raw| {
                let row = decode_row(raw)?;
                let body: MessageBody = serde_json::from_value(row.body)
                    .map_err(|e| StoreError::Database(format!("message body: {e}")))?;
                Ok((row.sort, body))
            })
            .collect()
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn decode_row((pk, sk, body): (String, String, String)) -> Result<EntityRow, StoreError> {
    let partition = EntityKey::decode(&pk).ok_or(StoreError::CorruptKey(pk))?;
    let sort = EntityKey::decode(&sk).ok_or(StoreError::CorruptKey(sk))?;
    let body = serde_json::from_str(&body)
        .map_err(|e| StoreError::Database(format!("body json: {e}")))?;
    Ok(EntityRow { partition, sort, body })
}
