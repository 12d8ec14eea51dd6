//! Schema migrations for the local store.
//!
//! `PRAGMA user_version` records how many migrations have been applied. New
//! migrations are appended; existing ones are never edited, and none of them may
//! drop `offline_data` or `pending_requests`.

use rusqlite::Connection;
use tracing::debug;

use crate::error::Result;

const MIGRATIONS: &[&str] = &[
  // 1: response cache and pending write queue
  r#"
CREATE TABLE IF NOT EXISTS offline_data (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_offline_data_timestamp
    ON offline_data(timestamp);

-- AUTOINCREMENT keeps ids monotonic and never reuses a deleted id
CREATE TABLE IF NOT EXISTS pending_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    endpoint TEXT NOT NULL,
    method TEXT NOT NULL,
    payload TEXT,
    enqueued_at INTEGER NOT NULL
);
"#,
  // 2: queue age lookups
  r#"
CREATE INDEX IF NOT EXISTS idx_pending_requests_enqueued
    ON pending_requests(enqueued_at);
"#,
  // 3: undecodable queue rows moved out of the delivery path
  r#"
CREATE TABLE IF NOT EXISTS set_aside_requests (
    id INTEGER PRIMARY KEY,
    endpoint TEXT NOT NULL,
    method TEXT NOT NULL,
    payload TEXT,
    enqueued_at INTEGER NOT NULL,
    reason TEXT NOT NULL,
    set_aside_at INTEGER NOT NULL
);
"#,
];

/// Latest schema version this build knows about.
pub const SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

/// Bring the database up to `SCHEMA_VERSION`.
pub fn migrate(conn: &mut Connection) -> Result<()> {
  let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

  for (index, sql) in MIGRATIONS.iter().enumerate() {
    let version = index as i64 + 1;
    if version <= current {
      continue;
    }

    debug!(version, "Applying store migration");
    let tx = conn.transaction()?;
    tx.execute_batch(sql)?;
    tx.pragma_update(None, "user_version", version)?;
    tx.commit()?;
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn user_version(conn: &Connection) -> i64 {
    conn
      .query_row("PRAGMA user_version", [], |row| row.get(0))
      .unwrap()
  }

  #[test]
  fn test_fresh_database_reaches_latest_version() {
    let mut conn = Connection::open_in_memory().unwrap();
    migrate(&mut conn).unwrap();
    assert_eq!(user_version(&conn), SCHEMA_VERSION);
  }

  #[test]
  fn test_upgrade_preserves_existing_rows() {
    let mut conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(MIGRATIONS[0]).unwrap();
    conn.pragma_update(None, "user_version", 1).unwrap();
    conn
      .execute(
        "INSERT INTO offline_data (key, value, timestamp) VALUES ('k', '1', 0)",
        [],
      )
      .unwrap();
    conn
      .execute(
        "INSERT INTO pending_requests (endpoint, method, payload, enqueued_at)
         VALUES ('/a', 'POST', NULL, 0)",
        [],
      )
      .unwrap();

    migrate(&mut conn).unwrap();

    let cached: i64 = conn
      .query_row("SELECT COUNT(*) FROM offline_data", [], |r| r.get(0))
      .unwrap();
    let pending: i64 = conn
      .query_row("SELECT COUNT(*) FROM pending_requests", [], |r| r.get(0))
      .unwrap();
    assert_eq!((cached, pending), (1, 1));
    assert_eq!(user_version(&conn), SCHEMA_VERSION);
  }

  #[test]
  fn test_migrate_is_idempotent() {
    let mut conn = Connection::open_in_memory().unwrap();
    migrate(&mut conn).unwrap();
    migrate(&mut conn).unwrap();
    assert_eq!(user_version(&conn), SCHEMA_VERSION);
  }
}
