//! SQLite-backed local store: response cache and pending write queue.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::{watch, OnceCell};
use tracing::{debug, info};

use super::schema;
use super::types::{from_millis, CacheEntry, Method, PendingRequest};
use crate::error::{Result, SyncError};

#[derive(Debug, Clone)]
enum Location {
  File(PathBuf),
  Memory,
}

/// A `pending_requests` row before its verb and payload are decoded.
struct RawPending {
  id: i64,
  endpoint: String,
  method: String,
  payload: Option<String>,
  enqueued_at: i64,
}

impl RawPending {
  fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id: row.get(0)?,
      endpoint: row.get(1)?,
      method: row.get(2)?,
      payload: row.get(3)?,
      enqueued_at: row.get(4)?,
    })
  }

  fn decode(self) -> Result<PendingRequest> {
    let id = self.id;
    let corrupt = |reason: String| SyncError::CorruptRequest { id, reason };

    let method = self
      .method
      .parse::<Method>()
      .map_err(|_| corrupt(format!("verb {}", self.method)))?;
    let payload = self
      .payload
      .map(|p| serde_json::from_str(&p))
      .transpose()
      .map_err(|e| corrupt(format!("payload: {}", e)))?;

    Ok(PendingRequest {
      id,
      endpoint: self.endpoint,
      method,
      payload,
      enqueued_at: from_millis(self.enqueued_at),
    })
  }
}

/// Durable cache + queue.
///
/// The connection opens lazily on first use. Concurrent first callers wait on
/// the same initialization, so exactly one connection is ever created.
pub struct LocalStore {
  location: Location,
  conn: OnceCell<Mutex<Connection>>,
  pending_count: watch::Sender<usize>,
}

impl LocalStore {
  /// Create a store at `path` without touching the filesystem yet.
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self::with_location(Location::File(path.into()))
  }

  /// Create a store that lives only as long as this value (tests).
  pub fn in_memory() -> Self {
    Self::with_location(Location::Memory)
  }

  /// Create a store at `path` and initialize it immediately.
  pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
    let store = Self::new(path);
    store.conn().await?;
    Ok(store)
  }

  fn with_location(location: Location) -> Self {
    let (pending_count, _) = watch::channel(0);
    Self {
      location,
      conn: OnceCell::new(),
      pending_count,
    }
  }

  /// Default database path under the user's data directory.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| {
        SyncError::Io(std::io::Error::other("Could not determine data directory"))
      })?;

    Ok(data_dir.join("offsync").join("offline.db"))
  }

  pub fn path(&self) -> Option<&Path> {
    match &self.location {
      Location::File(p) => Some(p),
      Location::Memory => None,
    }
  }

  async fn conn(&self) -> Result<&Mutex<Connection>> {
    self
      .conn
      .get_or_try_init(|| async { self.open_connection().map(Mutex::new) })
      .await
  }

  fn open_connection(&self) -> Result<Connection> {
    let mut conn = match &self.location {
      Location::File(path) => {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
          std::fs::create_dir_all(parent)?;
        }
        info!(path = %path.display(), "Opening local store");
        Connection::open(path)?
      }
      Location::Memory => Connection::open_in_memory()?,
    };

    schema::migrate(&mut conn)?;
    Ok(conn)
  }

  async fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    let cell = self.conn().await?;
    let conn = cell
      .lock()
      .map_err(|e| SyncError::Io(std::io::Error::other(format!("Lock poisoned: {}", e))))?;
    f(&conn)
  }

  /// Count queued rows and push the number to queue-depth subscribers.
  /// Runs under the connection lock so published counts follow commit order.
  fn publish_count(&self, conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM pending_requests", [], |row| {
      row.get(0)
    })?;
    let count = count as usize;
    self.pending_count.send_replace(count);
    Ok(count)
  }

  // === Cache ===

  /// Upsert a cached response.
  pub async fn save_data(&self, key: &str, value: &Value) -> Result<()> {
    let data = serde_json::to_string(value)?;
    let now = Utc::now().timestamp_millis();

    self
      .with_conn(|conn| {
        conn.execute(
          "INSERT INTO offline_data (key, value, timestamp) VALUES (?1, ?2, ?3)
           ON CONFLICT(key) DO UPDATE SET value = excluded.value, timestamp = excluded.timestamp",
          params![key, data, now],
        )?;
        Ok(())
      })
      .await
  }

  /// Cached response for `key`, or `None` on a miss.
  pub async fn get_data(&self, key: &str) -> Result<Option<Value>> {
    Ok(self.get_entry(key).await?.map(|entry| entry.value))
  }

  pub async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
    let row: Option<(String, i64)> = self
      .with_conn(|conn| {
        Ok(
          conn
            .query_row(
              "SELECT value, timestamp FROM offline_data WHERE key = ?1",
              params![key],
              |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?,
        )
      })
      .await?;

    match row {
      Some((data, ts)) => {
        let value = serde_json::from_str(&data)
          .map_err(|e| SyncError::CorruptEntry(format!("cache entry {}: {}", key, e)))?;
        Ok(Some(CacheEntry {
          key: key.to_string(),
          value,
          cached_at: from_millis(ts),
        }))
      }
      None => Ok(None),
    }
  }

  // === Pending queue ===

  /// Append a write to the queue and return its id.
  pub async fn store_pending_request(
    &self,
    endpoint: &str,
    method: Method,
    payload: Option<&Value>,
  ) -> Result<i64> {
    let payload = payload.map(serde_json::to_string).transpose()?;
    let now = Utc::now().timestamp_millis();

    self
      .with_conn(|conn| {
        conn.execute(
          "INSERT INTO pending_requests (endpoint, method, payload, enqueued_at)
           VALUES (?1, ?2, ?3, ?4)",
          params![endpoint, method.as_str(), payload, now],
        )?;
        let id = conn.last_insert_rowid();
        let depth = self.publish_count(conn)?;
        debug!(id, %method, endpoint, depth, "Queued pending request");
        Ok(id)
      })
      .await
  }

  /// All queued writes, oldest first. Fails on the first row that cannot be
  /// decoded.
  pub async fn get_pending_requests(&self) -> Result<Vec<PendingRequest>> {
    let rows: Vec<RawPending> = self
      .with_conn(|conn| {
        let mut stmt = conn.prepare(
          "SELECT id, endpoint, method, payload, enqueued_at
           FROM pending_requests ORDER BY id ASC",
        )?;
        let rows = stmt
          .query_map([], RawPending::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows.into_iter().map(RawPending::decode).collect()
  }

  /// The oldest queued write, if any. Only this row is read and decoded, so a
  /// corrupt row further back never hides a deliverable head.
  pub async fn get_pending_head(&self) -> Result<Option<PendingRequest>> {
    let row: Option<RawPending> = self
      .with_conn(|conn| {
        let row = conn
          .query_row(
            "SELECT id, endpoint, method, payload, enqueued_at
             FROM pending_requests ORDER BY id ASC LIMIT 1",
            [],
            RawPending::from_row,
          )
          .optional()?;
        Ok(row)
      })
      .await?;

    row.map(RawPending::decode).transpose()
  }

  /// Move a queued row into `set_aside_requests` together with `reason`.
  /// Returns whether the row was still queued.
  pub async fn set_aside_pending_request(&self, id: i64, reason: &str) -> Result<bool> {
    let now = Utc::now().timestamp_millis();

    self
      .with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let moved = tx.execute(
          "INSERT OR REPLACE INTO set_aside_requests
             (id, endpoint, method, payload, enqueued_at, reason, set_aside_at)
           SELECT id, endpoint, method, payload, enqueued_at, ?2, ?3
           FROM pending_requests WHERE id = ?1",
          params![id, reason, now],
        )?;
        tx.execute("DELETE FROM pending_requests WHERE id = ?1", params![id])?;
        tx.commit()?;

        let depth = self.publish_count(conn)?;
        info!(id, reason, depth, "Set aside undecodable pending request");
        Ok(moved > 0)
      })
      .await
  }

  /// Number of rows moved out of the queue by [`Self::set_aside_pending_request`].
  pub async fn get_set_aside_count(&self) -> Result<usize> {
    self
      .with_conn(|conn| {
        let count: i64 =
          conn.query_row("SELECT COUNT(*) FROM set_aside_requests", [], |row| row.get(0))?;
        Ok(count as usize)
      })
      .await
  }

  /// Delete one queued write. Returns whether a row was actually removed.
  pub async fn remove_pending_request(&self, id: i64) -> Result<bool> {
    self
      .with_conn(|conn| {
        let removed = conn.execute("DELETE FROM pending_requests WHERE id = ?1", params![id])?;
        self.publish_count(conn)?;
        Ok(removed > 0)
      })
      .await
  }

  /// Number of queued writes; also republished to queue-depth subscribers.
  pub async fn get_pending_request_count(&self) -> Result<usize> {
    self.with_conn(|conn| self.publish_count(conn)).await
  }

  /// Drop every queued write. Recovery tool, not part of the normal flow.
  pub async fn clear_pending_requests(&self) -> Result<usize> {
    self
      .with_conn(|conn| {
        let removed = conn.execute("DELETE FROM pending_requests", [])?;
        self.publish_count(conn)?;
        info!(removed, "Cleared pending requests");
        Ok(removed)
      })
      .await
  }

  /// Queue depth, pushed on every change. The receiver starts with the last
  /// published value.
  pub fn subscribe_pending_count(&self) -> watch::Receiver<usize> {
    self.pending_count.subscribe()
  }

  #[cfg(test)]
  pub(crate) async fn execute_raw(&self, sql: &str) -> Result<()> {
    self
      .with_conn(|conn| {
        conn.execute_batch(sql)?;
        Ok(())
      })
      .await
  }
}
