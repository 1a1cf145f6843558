//! Database module for satogram
//!
//! A small ordered key-value store on top of SQLite. It holds the peer
//! directory (see [`PeerStore`]) under the `"pk "` key namespace.

use crate::{SatogramError, SatogramResult};
use rusqlite::{Connection, OptionalExtension};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

mod codec;
mod models;
mod peers;

pub use codec::{decode, encode};
pub use models::*;
pub use peers::*;

fn map_db_error(e: rusqlite::Error) -> SatogramError {
    SatogramError::Storage(e.to_string())
}

/// Key-value store backed by SQLite
#[derive(Clone)]
pub struct Database {
    /// SQLite connection (wrapped in Arc<Mutex> for thread safety)
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Connect to the database
    pub async fn connect(database_url: &str) -> SatogramResult<Self> {
        info!("Opening database at {}", database_url);

        let path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| SatogramError::Storage(e.to_string()))?;
                }
            }
        }

        let conn = Connection::open(path).map_err(map_db_error)?;
        Self::run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory database
    pub async fn in_memory() -> SatogramResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    fn run_migrations(conn: &Connection) -> SatogramResult<()> {
        debug!("Running database migrations...");

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            )
            "#,
            [],
        )
        .map_err(map_db_error)?;

        debug!("Database migrations completed");
        Ok(())
    }

    /// Fetch the value stored under `key`, `NotFound` if absent
    pub async fn get(&self, key: &str) -> SatogramResult<Vec<u8>> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()
            .map_err(map_db_error)?
            .ok_or_else(|| SatogramError::NotFound(key.to_string()))
    }

    /// Store `value` under `key`, replacing any previous value
    pub async fn set(&self, key: &str, value: &[u8]) -> SatogramResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, value],
        )
        .map_err(map_db_error)?;
        Ok(())
    }

    /// Delete `key`. Deleting an absent key is not an error.
    pub async fn delete(&self, key: &str) -> SatogramResult<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM kv WHERE key = ?1", [key])
            .map_err(map_db_error)?;
        Ok(())
    }

    /// Read-modify-write `key` inside one transaction.
    ///
    /// `f` receives the current value (if any) and returns the value to
    /// write back, `None` leaving the entry untouched, together with a
    /// result handed back to the caller. An error from `f` rolls back.
    pub async fn modify<T, F>(&self, key: &str, f: F) -> SatogramResult<T>
    where
        F: FnOnce(Option<Vec<u8>>) -> SatogramResult<(Option<Vec<u8>>, T)>,
    {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(map_db_error)?;

        let current: Option<Vec<u8>> = tx
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()
            .map_err(map_db_error)?;

        // Dropping `tx` on the error path rolls the transaction back.
        let (next, result) = f(current)?;

        if let Some(value) = next {
            tx.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                rusqlite::params![key, value],
            )
            .map_err(map_db_error)?;
        }

        tx.commit().map_err(map_db_error)?;
        Ok(result)
    }

    /// Collect every key starting with `prefix`, in key order.
    ///
    /// The keys are read inside a single transaction, so the result is a
    /// consistent snapshot. The connection lock is released before returning.
    pub async fn keys(&self, prefix: &str) -> SatogramResult<Vec<String>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(map_db_error)?;

        let keys = {
            let mut stmt = tx
                .prepare("SELECT key FROM kv WHERE key >= ?1 ORDER BY key")
                .map_err(map_db_error)?;
            let rows = stmt
                .query_map([prefix], |row| row.get::<_, String>(0))
                .map_err(map_db_error)?;

            let mut keys = Vec::new();
            for key in rows {
                let key = key.map_err(map_db_error)?;
                if !key.starts_with(prefix) {
                    break;
                }
                keys.push(key);
            }
            keys
        };

        tx.commit().map_err(map_db_error)?;
        Ok(keys)
    }

    /// Run `f` on every key under `prefix`.
    ///
    /// Keys are snapshotted with [`Database::keys`] first and no lock is held
    /// while `f` runs, so `f` may freely read and write the store. Returning
    /// `Ok(false)` stops the iteration.
    pub async fn for_each_key<F, Fut>(&self, prefix: &str, mut f: F) -> SatogramResult<()>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = SatogramResult<bool>>,
    {
        let keys = self.keys(prefix).await?;

        for key in keys {
            if !f(key).await? {
                break;
            }
        }

        Ok(())
    }

    /// Number of keys under `prefix`
    pub async fn count_prefix(&self, prefix: &str) -> SatogramResult<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM kv WHERE substr(key, 1, length(?1)) = ?1",
                [prefix],
                |row| row.get(0),
            )
            .map_err(map_db_error)?;
        Ok(count as usize)
    }

    /// Delete every key under `prefix`, returning how many were removed
    pub async fn delete_prefix(&self, prefix: &str) -> SatogramResult<usize> {
        let conn = self.conn.lock().await;
        let removed = conn
            .execute(
                "DELETE FROM kv WHERE substr(key, 1, length(?1)) = ?1",
                [prefix],
            )
            .map_err(map_db_error)?;
        Ok(removed)
    }

    #[cfg(test)]
    pub(crate) async fn drop_kv_table(&self) {
        let conn = self.conn.lock().await;
        conn.execute("DROP TABLE kv", []).unwrap();
    }

    /// Close the database connection
    pub async fn close(&self) {
        info!("Closing database connection...");
        // The connection will be closed when the last Arc is dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing_key_is_not_found() {
        let db = Database::in_memory().await.unwrap();
        let err = db.get("pk nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let db = Database::in_memory().await.unwrap();
        db.set("pk 01", b"one").await.unwrap();
        assert_eq!(db.get("pk 01").await.unwrap(), b"one");

        db.set("pk 01", b"uno").await.unwrap();
        assert_eq!(db.get("pk 01").await.unwrap(), b"uno");

        db.delete("pk 01").await.unwrap();
        assert!(db.get("pk 01").await.unwrap_err().is_not_found());
        db.delete("pk 01").await.unwrap();
    }

    #[tokio::test]
    async fn test_keys_are_prefix_scoped_and_ordered() {
        let db = Database::in_memory().await.unwrap();
        for key in ["pk 03", "pk 01", "other", "pk 02", "pl 00", "pk"] {
            db.set(key, b"x").await.unwrap();
        }

        let keys = db.keys("pk ").await.unwrap();
        assert_eq!(keys, vec!["pk 01", "pk 02", "pk 03"]);
        assert_eq!(db.count_prefix("pk ").await.unwrap(), 3);
        assert_eq!(db.count_prefix("").await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_for_each_key_callback_can_write_without_deadlock() {
        let db = Database::in_memory().await.unwrap();
        db.set("pk 01", b"a").await.unwrap();
        db.set("pk 02", b"b").await.unwrap();

        let mut seen = Vec::new();
        let writer = db.clone();
        db.for_each_key("pk ", |key| {
            seen.push(key.clone());
            let writer = writer.clone();
            async move {
                // inserted mid-scan, sorts after every existing key
                writer.set(&format!("{}-late", key), b"c").await?;
                Ok(true)
            }
        })
        .await
        .unwrap();

        assert_eq!(seen, vec!["pk 01", "pk 02"]);
        assert_eq!(db.count_prefix("pk ").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_for_each_key_stops_early() {
        let db = Database::in_memory().await.unwrap();
        for key in ["pk 01", "pk 02", "pk 03"] {
            db.set(key, b"x").await.unwrap();
        }

        let mut visited = 0;
        db.for_each_key("pk ", |_| {
            visited += 1;
            let keep_going = visited < 2;
            async move { Ok(keep_going) }
        })
        .await
        .unwrap();

        assert_eq!(visited, 2);
    }

    #[tokio::test]
    async fn test_modify_reads_and_writes_in_one_transaction() {
        let db = Database::in_memory().await.unwrap();

        let was_absent = db
            .modify("counter", |current| {
                Ok((Some(b"1".to_vec()), current.is_none()))
            })
            .await
            .unwrap();
        assert!(was_absent);

        let previous = db
            .modify("counter", |current| Ok((Some(b"2".to_vec()), current)))
            .await
            .unwrap();
        assert_eq!(previous.as_deref(), Some(&b"1"[..]));
        assert_eq!(db.get("counter").await.unwrap(), b"2");
    }

    #[tokio::test]
    async fn test_modify_error_leaves_value_untouched() {
        let db = Database::in_memory().await.unwrap();
        db.set("k", b"before").await.unwrap();

        let result: SatogramResult<()> = db
            .modify("k", |_| Err(SatogramError::Codec("boom".to_string())))
            .await;
        assert!(result.is_err());
        assert_eq!(db.get("k").await.unwrap(), b"before");
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let db = Database::in_memory().await.unwrap();
        for key in ["pk 01", "pk 02", "meta"] {
            db.set(key, b"x").await.unwrap();
        }
        assert_eq!(db.delete_prefix("pk ").await.unwrap(), 2);
        assert_eq!(db.keys("").await.unwrap(), vec!["meta"]);
    }

    #[tokio::test]
    async fn test_file_backed_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("satogram.db");
        let url = path.to_string_lossy().to_string();

        {
            let db = Database::connect(&url).await.unwrap();
            db.set("pk 01", b"alias").await.unwrap();
        }

        let db = Database::connect(&url).await.unwrap();
        assert_eq!(db.get("pk 01").await.unwrap(), b"alias");
    }
}
