//! libSQL backend — async `KeyValueStore` implementation.
//!
//! Plain values live in `kv_entries`, set members in `kv_set_members`.
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::migrations;
use crate::store::traits::KeyValueStore;

/// libSQL key-value store.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Connection(format!("Failed to create database directory: {e}"))
                })?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to create in-memory database: {e}")))?;

        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

#[async_trait]
impl KeyValueStore for LibSqlStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut rows = self
            .conn()
            .query("SELECT value FROM kv_entries WHERE key = ?1", params![key])
            .await
            .map_err(|e| StoreError::Query(format!("get: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let value: String = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("get row parse: {e}")))?;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get: {e}"))),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO kv_entries (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value],
            )
            .await
            .map_err(|e| StoreError::Query(format!("set: {e}")))?;

        debug!(key = %key, "Value stored");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])
            .await
            .map_err(|e| StoreError::Query(format!("delete value: {e}")))?;
        conn.execute("DELETE FROM kv_set_members WHERE key = ?1", params![key])
            .await
            .map_err(|e| StoreError::Query(format!("delete set: {e}")))?;

        debug!(key = %key, "Key deleted");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT EXISTS(SELECT 1 FROM kv_entries WHERE key = ?1)
                     OR EXISTS(SELECT 1 FROM kv_set_members WHERE key = ?1)",
                params![key],
            )
            .await
            .map_err(|e| StoreError::Query(format!("exists: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let found: i64 = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("exists row parse: {e}")))?;
                Ok(found != 0)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(StoreError::Query(format!("exists: {e}"))),
        }
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT key FROM kv_entries WHERE instr(key, ?1) = 1
                 UNION
                 SELECT key FROM kv_set_members WHERE instr(key, ?1) = 1
                 ORDER BY key",
                params![prefix],
            )
            .await
            .map_err(|e| StoreError::Query(format!("keys: {e}")))?;

        let mut keys = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("keys: {e}")))?
        {
            let key: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("keys row parse: {e}")))?;
            keys.push(key);
        }
        Ok(keys)
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<usize, StoreError> {
        if members.is_empty() {
            return Ok(0);
        }

        // Single statement: the whole batch is inserted or none of it.
        let placeholders: Vec<String> = (0..members.len())
            .map(|i| format!("(?1, ?{})", i + 2))
            .collect();
        let sql = format!(
            "INSERT OR IGNORE INTO kv_set_members (key, member) VALUES {}",
            placeholders.join(", ")
        );

        let mut values = Vec::with_capacity(members.len() + 1);
        values.push(key.to_string());
        values.extend(members.iter().cloned());

        let added = self
            .conn()
            .execute(&sql, values)
            .await
            .map_err(|e| StoreError::Query(format!("set_add: {e}")))? as usize;

        if added > 0 {
            debug!(key = %key, added, "Set members added");
        }
        Ok(added)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT member FROM kv_set_members WHERE key = ?1",
                params![key],
            )
            .await
            .map_err(|e| StoreError::Query(format!("set_members: {e}")))?;

        let mut members = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("set_members: {e}")))?
        {
            let member: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("set_members row parse: {e}")))?;
            members.push(member);
        }
        Ok(members)
    }
}
