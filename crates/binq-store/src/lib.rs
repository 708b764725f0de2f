//! The persistent store: queues and messages in an embedded SQLite
//! database, with soft-delete tombstones for acknowledged messages.
//!
//! `rusqlite::Connection` is `Send` but not `Sync`, so every operation is
//! dispatched to a blocking task via [`tokio::task::spawn_blocking`] while
//! holding a `std::sync::Mutex`. SQLite's own locking then gives WAL-style
//! concurrent readers and a single writer; callers that hit `SQLITE_BUSY`
//! see it surfaced as [`StoreError::Sqlite`] and are expected to retry.

mod models;

pub use models::{Message, Queue};

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

const SCHEMA_SQL: &str = include_str!("schema.sql");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("queue '{0}' already exists")]
    DuplicateQueue(String),
    #[error("queue '{0}' does not exist")]
    QueueNotFound(String),
    #[error("background task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("store mutex poisoned");
            f(&guard)
        })
        .await?
    }

    pub async fn create_queue(&self, name: String, max_partitions: u32) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            let result = conn.execute(
                "INSERT INTO queues (name, max_partitions, created_at) VALUES (?1, ?2, ?3)",
                params![name, max_partitions, now],
            );
            match result {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::DuplicateQueue(name))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    pub async fn get_queue(&self, name: String) -> StoreResult<Option<Queue>> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT name, max_partitions, created_at FROM queues WHERE name = ?1",
                params![name],
                |row| {
                    Ok(Queue {
                        name: row.get(0)?,
                        max_partitions: row.get(1)?,
                        created_at: parse_timestamp(row.get::<_, String>(2)?),
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    pub async fn create_message(
        &self,
        queue_name: String,
        partition: u32,
        data: Vec<u8>,
        file_name: Option<String>,
        file_extension: Option<String>,
    ) -> StoreResult<u64> {
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO messages
                    (queue_name, partition, data, file_name, file_extension, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![queue_name, partition, data, file_name, file_extension, now],
            )?;
            Ok(conn.last_insert_rowid() as u64)
        })
        .await
    }

    /// Visible messages for the given partitions, ordered by id ascending.
    pub async fn find_visible(
        &self,
        queue_name: String,
        partitions: Vec<u32>,
        limit: u32,
    ) -> StoreResult<Vec<Message>> {
        if partitions.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn(move |conn| {
            let placeholders = vec!["?"; partitions.len()].join(",");
            let sql = format!(
                "SELECT id, queue_name, partition, data, file_name, file_extension,
                        lock_until, deleted_at, created_at
                 FROM messages
                 WHERE queue_name = ?
                   AND partition IN ({placeholders})
                   AND deleted_at IS NULL
                   AND (lock_until IS NULL OR lock_until <= ?)
                 ORDER BY id ASC
                 LIMIT ?"
            );
            let mut stmt = conn.prepare(&sql)?;
            let now = Utc::now().to_rfc3339();

            let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
            bound.push(Box::new(queue_name));
            for p in &partitions {
                bound.push(Box::new(*p));
            }
            bound.push(Box::new(now));
            bound.push(Box::new(limit));

            let rows = stmt.query_map(params_from_iter(bound.iter().map(|b| b.as_ref())), |row| {
                Ok(Message {
                    id: row.get::<_, i64>(0)? as u64,
                    queue_name: row.get(1)?,
                    partition: row.get(2)?,
                    data: row.get(3)?,
                    file_name: row.get(4)?,
                    file_extension: row.get(5)?,
                    lock_until: row
                        .get::<_, Option<String>>(6)?
                        .map(|s| parse_timestamp(s)),
                    deleted_at: row
                        .get::<_, Option<String>>(7)?
                        .map(|s| parse_timestamp(s)),
                    created_at: parse_timestamp(row.get::<_, String>(8)?),
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
        .await
    }

    /// Sets `lockUntil` for the given message ids. Callers are responsible
    /// for chunking large id lists to keep parameter counts bounded.
    pub async fn lock_messages(&self, ids: Vec<u64>, until: DateTime<Utc>) -> StoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.with_conn(move |conn| {
            let placeholders = vec!["?"; ids.len()].join(",");
            let sql = format!("UPDATE messages SET lock_until = ? WHERE id IN ({placeholders})");
            let until = until.to_rfc3339();
            let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::with_capacity(ids.len() + 1);
            bound.push(Box::new(until));
            for id in &ids {
                bound.push(Box::new(*id as i64));
            }
            conn.execute(&sql, params_from_iter(bound.iter().map(|b| b.as_ref())))?;
            Ok(())
        })
        .await
    }

    /// Soft-deletes the given message ids. Callers are responsible for
    /// chunking large id lists to keep parameter counts bounded.
    pub async fn soft_delete(&self, ids: Vec<u64>) -> StoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.with_conn(move |conn| {
            let placeholders = vec!["?"; ids.len()].join(",");
            let sql = format!(
                "UPDATE messages SET deleted_at = ? WHERE id IN ({placeholders}) AND deleted_at IS NULL"
            );
            let now = Utc::now().to_rfc3339();
            let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::with_capacity(ids.len() + 1);
            bound.push(Box::new(now));
            for id in &ids {
                bound.push(Box::new(*id as i64));
            }
            conn.execute(&sql, params_from_iter(bound.iter().map(|b| b.as_ref())))?;
            Ok(())
        })
        .await
    }

    /// Hard-deletes tombstones soft-deleted before `older_than`. Intended to
    /// be run once a day by a background task.
    pub async fn hard_delete_tombstones(&self, older_than: DateTime<Utc>) -> StoreResult<usize> {
        self.with_conn(move |conn| {
            let cutoff = older_than.to_rfc3339();
            let affected = conn.execute(
                "DELETE FROM messages WHERE deleted_at IS NOT NULL AND deleted_at < ?1",
                params![cutoff],
            )?;
            Ok(affected)
        })
        .await
    }
}

fn parse_timestamp(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .expect("stored timestamps are always valid rfc3339")
        .with_timezone(&Utc)
}
