pub mod error;
pub mod queries;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tokio::sync::broadcast;
use tracing::info;

use banter_types::events::ChangeEvent;

pub use error::StoreError;
pub use queries::EntityRow;

/// Feed buffer depth. A consumer that falls further behind than this sees a
/// Lagged error and skips ahead; membership is always re-queried, never
/// reconstructed from the feed, so skipped events cost notifications only.
const FEED_CAPACITY: usize = 1024;

/// Composite-key entity store: one `entities` table keyed by `(pk, sk)` with
/// a reverse `(sk, pk)` index, plus a change feed that emits one event per
/// committed mutation.
pub struct EntityStore {
    conn: Mutex<Connection>,
    feed: broadcast::Sender<ChangeEvent>,
}

impl EntityStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(format!("create dir: {e}")))?;
        }

        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        schema(&conn)?;

        info!("entity store opened at {}", path.display());
        Ok(Self::with_conn_inner(conn))
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema(&conn)?;
        Ok(Self::with_conn_inner(conn))
    }

    fn with_conn_inner(conn: Connection) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            conn: Mutex::new(conn),
            feed,
        }
    }

    /// Subscribe to the ordered change feed. Events are emitted after the
    /// mutation commits, in commit order.
    pub fn subscribe_feed(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    pub(crate) fn emit(&self, event: ChangeEvent) {
        // No receivers is fine; the feed is best-effort by design.
        let _ = self.feed.send(event);
    }

    pub(crate) fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Database(format!("connection lock poisoned: {e}")))
    }
}

fn schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS entities (
            pk    TEXT NOT NULL,
            sk    TEXT NOT NULL,
            body  TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (pk, sk)
        );

        CREATE INDEX IF NOT EXISTS idx_entities_reverse
            ON entities(sk, pk);
        ",
    )?;
    Ok(())
}
