//! SQLite-backed history store.
//!
//! Two tables:
//! - `session_id`: email → session handle, written insert-if-absent
//! - `chat_history`: one row per message, JSON payload, ordered by rowid

use crate::traits::HistoryStore;
use crate::types::{Message, SessionHandle};
use async_trait::async_trait;
use docchat_common::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS session_id (
        email TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS chat_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        message TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_chat_history_session ON chat_history(session_id, id);
"#;

fn db_err(e: rusqlite::Error) -> Error {
    Error::Persistence(e.to_string())
}

/// SQLite history store.
///
/// All statements run on the blocking pool against a single shared connection.
#[derive(Clone)]
pub struct SqliteHistoryStore {
    db_path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistoryStore {
    /// Open (or create) the database at `db_path` and ensure the schema exists.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path).map_err(db_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        tracing::debug!(path = %db_path.display(), "Opened history database");

        Ok(Self {
            db_path: db_path.to_path_buf(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| Error::Persistence(format!("connection lock poisoned: {e}")))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::Internal(format!("blocking task failed: {e}")))?
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get_session_handle(&self, email: &str) -> Result<Option<SessionHandle>> {
        let email = email.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT session_id FROM session_id WHERE email = ?1",
                params![email],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map(|found| found.map(SessionHandle::from))
            .map_err(db_err)
        })
        .await
    }

    async fn upsert_session_handle(
        &self,
        email: &str,
        candidate: &SessionHandle,
    ) -> Result<SessionHandle> {
        let email = email.to_string();
        let candidate = candidate.as_str().to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO session_id (email, session_id, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(email) DO NOTHING",
                params![email, candidate, chrono::Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;

            let winner: String = conn
                .query_row(
                    "SELECT session_id FROM session_id WHERE email = ?1",
                    params![email],
                    |row| row.get(0),
                )
                .map_err(db_err)?;
            Ok(SessionHandle::from(winner))
        })
        .await
    }

    async fn load_messages(&self, handle: &SessionHandle) -> Result<Vec<Message>> {
        let session = handle.as_str().to_string();
        let rows: Vec<String> = self
            .with_conn(move |conn| {
                let mut stmt = conn
                    .prepare("SELECT message FROM chat_history WHERE session_id = ?1 ORDER BY id")
                    .map_err(db_err)?;
                let rows = stmt
                    .query_map(params![session], |row| row.get::<_, String>(0))
                    .map_err(db_err)?;
                rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
            })
            .await?;

        rows.iter()
            .map(|raw| serde_json::from_str::<Message>(raw).map_err(Error::from))
            .collect()
    }

    async fn save_messages(&self, handle: &SessionHandle, messages: &[Message]) -> Result<()> {
        // Encode before touching the database so a bad payload never half-replaces a session.
        let payloads = messages
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let session = handle.as_str().to_string();

        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            tx.execute(
                "DELETE FROM chat_history WHERE session_id = ?1",
                params![session],
            )
            .map_err(db_err)?;
            {
                let mut stmt = tx
                    .prepare("INSERT INTO chat_history (session_id, message) VALUES (?1, ?2)")
                    .map_err(db_err)?;
                for payload in &payloads {
                    stmt.execute(params![session, payload]).map_err(db_err)?;
                }
            }
            tx.commit().map_err(db_err)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(db_err)
        })
        .await
        .is_ok()
    }
}
