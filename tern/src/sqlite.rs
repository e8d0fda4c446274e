//!
//! # SQLite support
//!
//! [SqliteSession] adapts a [`rusqlite::Connection`] to [Session].
//!
//! ## Lock emulation
//!
//! SQLite has no advisory locks, so the migration lock is emulated with a lease row in a
//! `tern_lock` table. A session acquires the lock by inserting the row for the lock key,
//! or by taking over a row whose lease has expired, and polls until one of those succeeds.
//! Release deletes the row if this session still owns it.
//!
//! If a holder crashes, other sessions wait until its lease expires (10 minutes by default,
//! see [SqliteSession::with_lease]). Leases are not renewed while held, so the lease must
//! outlast the longest migration run.
//!
//! ## Differences from PostgreSQL
//!
//! | Behavior | PostgreSQL | SQLite |
//! |----------|------------|--------|
//! | Lock | `pg_advisory_lock`, released when the session ends | lease row, released on expiry |
//! | Step transaction | `BEGIN` | `BEGIN IMMEDIATE` |
//! | Session reset | `reset all` | nothing to reset |
//! | `<table>_check` function | created | not available |

use crate::error::Error;
use crate::session::Session;
use chrono::Utc;
use rusqlite::{Connection, ErrorCode};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

const LOCK_TABLE: &str = "tern_lock";

/// A SQLite connection usable as a migration [Session].
pub struct SqliteSession {
    conn: Connection,
    owner: String,
    lease: Duration,
    poll_interval: Duration,
    lock_table_ready: bool,
}

impl SqliteSession {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            owner: Uuid::new_v4().to_string(),
            lease: Duration::from_secs(600),
            poll_interval: Duration::from_millis(50),
            lock_table_ready: false,
        }
    }

    /// Opens the database file at `path` with a 30 second busy timeout.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(30))?;
        Ok(Self::new(conn))
    }

    /// How long an acquired lock stays valid if it is never released.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// How long to sleep between attempts while another session holds the lock.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn into_inner(self) -> Connection {
        self.conn
    }

    fn try_acquire(&mut self, key: i64) -> Result<bool, Error> {
        if !self.lock_table_ready {
            self.conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {LOCK_TABLE} (
                    key INTEGER PRIMARY KEY NOT NULL,
                    owner TEXT NOT NULL,
                    expires_at INTEGER NOT NULL
                )"
            ))?;
            self.lock_table_ready = true;
        }

        let now = Utc::now().timestamp_millis();
        let lease = i64::try_from(self.lease.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now.saturating_add(lease);
        let changed = self.conn.execute(
            &format!(
                "INSERT INTO {LOCK_TABLE} (key, owner, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET owner = excluded.owner, expires_at = excluded.expires_at
                 WHERE {LOCK_TABLE}.expires_at <= ?4"
            ),
            rusqlite::params![key, self.owner, expires_at, now],
        )?;
        Ok(changed == 1)
    }
}

fn is_busy(error: &Error) -> bool {
    matches!(
        error,
        Error::Rusqlite(e) if matches!(e.sqlite_error_code(), Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked))
    )
}

fn split_qualified(table: &str) -> (Option<&str>, &str) {
    match table.split_once('.') {
        Some((schema, name)) => (Some(schema), name),
        None => (None, table),
    }
}

impl Session for SqliteSession {
    fn execute_sql(&mut self, sql: &str) -> Result<(), Error> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn acquire_lock(&mut self, key: i64) -> Result<(), Error> {
        loop {
            match self.try_acquire(key) {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) if is_busy(&e) => {}
                Err(e) => return Err(e),
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    fn release_lock(&mut self, key: i64) -> Result<(), Error> {
        if !self.lock_table_ready {
            return Ok(());
        }
        self.conn.execute(
            &format!("DELETE FROM {LOCK_TABLE} WHERE key = ?1 AND owner = ?2"),
            rusqlite::params![key, self.owner],
        )?;
        Ok(())
    }

    fn version_table_exists(&mut self, table: &str) -> Result<bool, Error> {
        let (schema, name) = split_qualified(table);
        let master = match schema {
            Some(schema) => format!("{schema}.sqlite_master"),
            None => "sqlite_master".to_string(),
        };
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {master} WHERE type = 'table' AND name = ?1"),
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn create_version_table(&mut self, table: &str) -> Result<(), Error> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY NOT NULL CHECK (id = 1),
                version INTEGER NOT NULL CHECK (version >= 0)
            );
            INSERT OR IGNORE INTO {table} (id, version) VALUES (1, 0);"
        ))?;
        Ok(())
    }

    fn read_versions(&mut self, table: &str) -> Result<Vec<i32>, Error> {
        let mut stmt = self.conn.prepare(&format!("SELECT version FROM {table}"))?;
        let versions = stmt
            .query_map([], |row| row.get::<_, i32>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(versions)
    }

    fn write_version(&mut self, table: &str, version: i32) -> Result<u64, Error> {
        let changed = self
            .conn
            .execute(&format!("UPDATE {table} SET version = ?1"), [version])?;
        Ok(changed as u64)
    }

    fn drop_service_data(&mut self, table: &str) -> Result<(), Error> {
        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {table}"))?;
        Ok(())
    }

    fn begin(&mut self) -> Result<(), Error> {
        self.execute_sql("BEGIN IMMEDIATE")
    }
}

// Manual Debug impl since Connection's Debug output is not useful here
impl std::fmt::Debug for SqliteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSession")
            .field("owner", &self.owner)
            .field("lease", &self.lease)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}
