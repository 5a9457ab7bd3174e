use std::fmt;
use std::str::FromStr;

use rusqlite::Connection;

use super::{project_code, Repository};
use crate::error::{Error, Result};

/// Entity kinds with their own id counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceKind {
    Roadmap,
    Track,
    Task,
    Ac,
    Adr,
    Iteration,
}

impl SequenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Roadmap => "roadmap",
            Self::Track => "track",
            Self::Task => "task",
            Self::Ac => "ac",
            Self::Adr => "adr",
            Self::Iteration => "iter",
        }
    }
}

impl FromStr for SequenceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "roadmap" => Ok(Self::Roadmap),
            "track" => Ok(Self::Track),
            "task" => Ok(Self::Task),
            "ac" => Ok(Self::Ac),
            "adr" => Ok(Self::Adr),
            "iter" | "iteration" => Ok(Self::Iteration),
            other => Err(Error::invalid(format!("unknown sequence kind '{}'", other))),
        }
    }
}

impl fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Repository {
    /// Next value of the `kind` counter: 1, 2, 3, ... Values are never
    /// handed out twice, even after the entity using one is deleted.
    pub fn next_sequence_number(&self, kind: SequenceKind) -> Result<i64> {
        let conn = self.conn();
        next_sequence_number(&conn, kind)
    }

    /// Next external id for `kind`: `roadmap-<n>` for roadmaps, otherwise
    /// `<CODE>-<kind>-<n>`.
    pub fn next_id(&self, kind: SequenceKind) -> Result<String> {
        let conn = self.conn();
        next_id(&conn, kind)
    }
}

pub(super) fn next_sequence_number(conn: &Connection, kind: SequenceKind) -> Result<i64> {
    let value = conn.query_row(
        "INSERT INTO sequences (kind, value) VALUES (?1, 1)
         ON CONFLICT(kind) DO UPDATE SET value = value + 1
         RETURNING value",
        [kind.as_str()],
        |row| row.get(0),
    )?;
    Ok(value)
}

/// Raises the counter to at least `value`, e.g. after an explicit number was
/// stored.
pub(super) fn advance_sequence(conn: &Connection, kind: SequenceKind, value: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO sequences (kind, value) VALUES (?1, ?2)
         ON CONFLICT(kind) DO UPDATE SET value = MAX(value, excluded.value)",
        (kind.as_str(), value),
    )?;
    Ok(())
}

pub(super) fn next_id(conn: &Connection, kind: SequenceKind) -> Result<String> {
    let n = next_sequence_number(conn, kind)?;
    match kind {
        SequenceKind::Roadmap => Ok(format!("roadmap-{}", n)),
        _ => Ok(format!("{}-{}-{}", project_code(conn)?, kind, n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> Repository {
        let repo = Repository::open_memory().unwrap();
        repo.migrate().unwrap();
        repo
    }

    #[test]
    fn counters_start_at_one_and_are_independent() {
        let repo = repo();
        let acs: Vec<i64> = (0..3)
            .map(|_| repo.next_sequence_number(SequenceKind::Ac).unwrap())
            .collect();
        assert_eq!(acs, vec![1, 2, 3]);
        assert_eq!(repo.next_sequence_number(SequenceKind::Adr).unwrap(), 1);
        assert_eq!(repo.next_sequence_number(SequenceKind::Ac).unwrap(), 4);
    }

    #[test]
    fn ids_use_project_code() {
        let repo = repo();
        repo.set_project_code("ab").unwrap();
        assert_eq!(repo.next_id(SequenceKind::Task).unwrap(), "AB-task-1");
        assert_eq!(repo.next_id(SequenceKind::Roadmap).unwrap(), "roadmap-1");
    }

    #[test]
    fn advance_never_lowers_the_counter() {
        let repo = repo();
        let conn = repo.conn();
        advance_sequence(&conn, SequenceKind::Iteration, 5).unwrap();
        advance_sequence(&conn, SequenceKind::Iteration, 2).unwrap();
        assert_eq!(next_sequence_number(&conn, SequenceKind::Iteration).unwrap(), 6);
    }

    #[test]
    fn unknown_kind_is_invalid() {
        assert!(matches!("epic".parse::<SequenceKind>(), Err(Error::InvalidArgument(_))));
    }
}
