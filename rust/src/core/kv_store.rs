// Key-value persistence for the message snapshot.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};

const KV_DB_FILE: &str = "chat_store.sqlite3";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS kv (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

/// String-keyed blob store. Implementations must be usable from the persister thread.
pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

pub struct SqliteKvStore {
    conn: Mutex<Connection>,
}

impl SqliteKvStore {
    pub fn open(data_dir: &str) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("create data dir {data_dir}"))?;
        let path = Path::new(data_dir).join(KV_DB_FILE);
        let conn = Connection::open(&path)
            .with_context(|| format!("open kv store at {}", path.display()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            "#,
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }
}

impl KeyValueStore for SqliteKvStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let value = self
            .conn()
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .with_context(|| format!("read key {key}"))?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.conn()
            .execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                rusqlite::params![key, value],
            )
            .with_context(|| format!("write key {key}"))?;
        Ok(())
    }
}

/// Process-local store. Used when the on-disk store cannot be opened, and in tests.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let entries = match self.entries.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut entries = match self.entries.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

pub(crate) fn open_store(data_dir: &str) -> Arc<dyn KeyValueStore> {
    match SqliteKvStore::open(data_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!(
                error = %format!("{e:#}"),
                "failed to open kv store; history will not survive restart"
            );
            Arc::new(MemoryKvStore::new())
        }
    }
}
