//! SQLite-backed repository for one project.
//!
//! Every public operation locks the connection once and works through
//! `&Connection` helpers, so operations never re-enter the lock. Guarded
//! transitions and multi-row writes run in a single `IMMEDIATE` transaction.

mod adrs;
mod criteria;
mod iterations;
mod queries;
mod roadmaps;
mod schema;
mod sequence;
mod tasks;
mod tracks;

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, InterruptHandle};

use crate::error::{Error, Result};
use crate::events::{RepositoryEvent, RepositoryObserver};

pub use sequence::SequenceKind;

/// Project code used when none has been recorded.
pub const DEFAULT_PROJECT_CODE: &str = "TP";

pub struct Repository {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
    observers: Vec<Arc<dyn RepositoryObserver>>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Opens (creating if needed) the store at `path`.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(busy_timeout)?;
        Self::with_connection(conn)
    }

    pub fn open_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            interrupt: Arc::new(conn.get_interrupt_handle()),
            conn: Arc::new(Mutex::new(conn)),
            observers: Vec::new(),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn();
        schema::run_migrations(&conn)
    }

    /// Registers an observer notified after each committed write.
    pub fn with_observer(mut self, observer: Arc<dyn RepositoryObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Handle for cancelling the statement currently running on this
    /// repository from another thread. An interrupted operation fails with
    /// [`Error::Storage`] and its transaction is rolled back.
    ///
    /// Does not take the connection lock, so it can be obtained while an
    /// operation is running.
    pub fn interrupt_handle(&self) -> Arc<InterruptHandle> {
        Arc::clone(&self.interrupt)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database lock poisoned")
    }

    fn notify(&self, events: impl IntoIterator<Item = RepositoryEvent>) {
        for event in events {
            for observer in &self.observers {
                observer.notify(&event);
            }
        }
    }

    // ============================================================
    // Project metadata
    // ============================================================

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn();
        get_metadata(&conn, key)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO project_metadata (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            (key, value),
        )?;
        Ok(())
    }

    /// Prefix of every external id in this project, e.g. `TP` in `TP-task-3`.
    pub fn project_code(&self) -> Result<String> {
        let conn = self.conn();
        project_code(&conn)
    }

    pub fn set_project_code(&self, code: &str) -> Result<()> {
        let code = code.trim();
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::validation(format!(
                "project code '{}' must be non-empty and alphanumeric",
                code
            )));
        }
        self.set_metadata(PROJECT_CODE_KEY, &code.to_ascii_uppercase())
    }
}

impl Clone for Repository {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            interrupt: Arc::clone(&self.interrupt),
            observers: self.observers.clone(),
        }
    }
}

const PROJECT_CODE_KEY: &str = "project_code";

fn get_metadata(conn: &Connection, key: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT value FROM project_metadata WHERE key = ?")?;
    let mut rows = stmt.query([key])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

fn project_code(conn: &Connection) -> Result<String> {
    let code = get_metadata(conn, PROJECT_CODE_KEY)?;
    Ok(code.unwrap_or_else(|| DEFAULT_PROJECT_CODE.to_string()))
}

/// Current time at the precision stored on disk, so values read back compare
/// equal to the ones written.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_optional_datetime(
    idx: usize,
    s: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_datetime(idx, &s)).transpose()
}

/// Unknown enum strings in storage are conversion errors, never defaults.
fn parse_enum<T>(idx: usize, s: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = Error>,
{
    s.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Maps primary key and unique violations on insert to `AlreadyExists`.
fn map_insert_error(err: rusqlite::Error, what: impl FnOnce() -> String) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Error::already_exists(what())
        }
        _ => Error::Storage(err),
    }
}

fn exists(conn: &Connection, sql: &str, key: &dyn rusqlite::ToSql) -> Result<bool> {
    let found: i64 = conn.query_row(sql, [key], |row| row.get(0))?;
    Ok(found > 0)
}

/// `?, ?, ?` for an `IN (...)` clause of `n` values.
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_timestamps_round_trip_exactly() {
        let t = now();
        assert_eq!(parse_datetime(0, &format_datetime(&t)).unwrap(), t);
    }

    #[test]
    fn unknown_enum_in_storage_is_a_conversion_error() {
        let err = parse_enum::<crate::models::TaskStatus>(3, "finished").unwrap_err();
        assert!(matches!(err, rusqlite::Error::FromSqlConversionFailure(3, _, _)));
    }

    #[test]
    fn project_code_defaults_and_is_uppercased() {
        let repo = Repository::open_memory().unwrap();
        repo.migrate().unwrap();
        assert_eq!(repo.project_code().unwrap(), DEFAULT_PROJECT_CODE);

        repo.set_project_code("web").unwrap();
        assert_eq!(repo.project_code().unwrap(), "WEB");
        assert!(repo.set_project_code("a-b").is_err());
    }

    #[test]
    fn interrupt_reaches_a_running_transaction_and_rolls_it_back() {
        let repo = Repository::open_memory().unwrap();
        repo.migrate().unwrap();

        let worker = {
            let repo = repo.clone();
            std::thread::spawn(move || -> Result<i64> {
                let mut conn = repo.conn();
                let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
                tx.execute(
                    "INSERT INTO project_metadata (key, value) VALUES ('owner', 'worker')",
                    [],
                )?;
                let rows = tx.query_row(
                    "WITH RECURSIVE c(x) AS (
                         SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 1000000000000
                     )
                     SELECT COUNT(*) FROM c",
                    [],
                    |row| row.get(0),
                )?;
                tx.commit()?;
                Ok(rows)
            })
        };

        while !worker.is_finished() {
            repo.interrupt_handle().interrupt();
            std::thread::sleep(Duration::from_millis(10));
        }

        let err = worker.join().unwrap().unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(repo.get_metadata("owner").unwrap(), None);
    }

    #[test]
    fn placeholders_for_in_clause() {
        assert_eq!(placeholders(3), "?, ?, ?");
    }
}
