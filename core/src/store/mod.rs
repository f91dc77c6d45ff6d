//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Components call store methods; they never execute SQL directly.
//!
//! Counters (`total_leads`, `total_calls`, `successful_calls`) are only ever
//! changed with single-statement `col = col + n` updates.

use crate::{
    error::CrmResult,
    event::EventLogEntry,
    types::{from_millis, to_millis},
};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use std::time::Duration;

mod call;
mod lead;
mod user;

pub struct CrmStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl CrmStore {
    pub fn open(path: &str) -> CrmResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        // Independent requests hold their own connection; wait instead of failing.
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> CrmResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Open a second connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    pub fn reopen(&self) -> CrmResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> CrmResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_users.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_leads.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_calls.sql"))?;
        Ok(())
    }

    /// Run `f` inside one transaction. Any error rolls back every write `f`
    /// made. Called while a transaction is already open, `f` joins it.
    ///
    /// The write lock is taken up front (`BEGIN IMMEDIATE`): a connection
    /// that reads and then writes waits out the busy timeout for other
    /// writers instead of failing its lock upgrade.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Self) -> CrmResult<T>) -> CrmResult<T> {
        if !self.conn.is_autocommit() {
            return f(self);
        }
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> CrmResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (occurred_at, component, event_type, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                to_millis(entry.occurred_at),
                entry.component,
                entry.event_type,
                entry.payload,
            ],
        )?;
        Ok(())
    }

    pub fn events_of_type(&self, event_type: &str) -> CrmResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, occurred_at, component, event_type, payload
             FROM event_log WHERE event_type = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![event_type], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    occurred_at: from_millis(row.get(1)?),
                    component: row.get(2)?,
                    event_type: row.get(3)?,
                    payload: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn event_count(&self) -> CrmResult<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM event_log", [], |row| row.get(0))?;
        Ok(n)
    }

    // ── Test / maintenance helpers ─────────────────────────────

    /// Execute raw SQL. Used by tests to install fault-injection triggers.
    pub fn execute_raw(&self, sql: &str) -> CrmResult<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}

/// Builds `?n, ?n+1, …` placeholders for an `IN (…)` list.
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}
