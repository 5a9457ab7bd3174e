//! Error taxonomy shared by every repository operation.
//!
//! Callers branch on [`Error::kind`] rather than on message text. Completion
//! attempts rejected by an acceptance-criteria gate carry a [`GateReport`]
//! with everything needed to act on the refusal without a second query.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::AcStatus;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input caught before anything was persisted.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Illegal state transition or structural violation (cycle, self edge, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    GateBlocked(GateReport),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    AlreadyExists,
    InvalidArgument,
    GateBlocked,
    Storage,
    Io,
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::GateBlocked(_) => ErrorKind::GateBlocked,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// The gate report, if this error is a blocked completion.
    pub fn gate_report(&self) -> Option<&GateReport> {
        match self {
            Self::GateBlocked(report) => Some(report),
            _ => None,
        }
    }
}

/// Which completion the gate refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateTarget {
    Task,
    Iteration(i64),
}

/// An acceptance criterion that prevents completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingCriterion {
    pub id: String,
    pub task_id: String,
    pub description: String,
    pub status: AcStatus,
    /// Failure reason for failed criteria, empty otherwise.
    pub notes: String,
}

/// Blocking criteria of one task, split the way a reviewer acts on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedTask {
    pub task_id: String,
    pub task_title: String,
    /// `not_started` and `pending_human_review` criteria.
    pub unverified: Vec<BlockingCriterion>,
    pub failed: Vec<BlockingCriterion>,
}

impl BlockedTask {
    pub fn criteria(&self) -> impl Iterator<Item = &BlockingCriterion> {
        self.unverified.iter().chain(self.failed.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateReport {
    pub target: GateTarget,
    pub tasks: Vec<BlockedTask>,
}

impl GateReport {
    /// Every blocking criterion id, grouped by task in report order.
    pub fn criterion_ids(&self) -> Vec<String> {
        self.tasks
            .iter()
            .flat_map(|t| t.criteria().map(|c| c.id.clone()))
            .collect()
    }

    pub fn unverified_count(&self) -> usize {
        self.tasks.iter().map(|t| t.unverified.len()).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.tasks.iter().map(|t| t.failed.len()).sum()
    }
}

impl fmt::Display for GateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            GateTarget::Task => write!(f, "cannot mark task as done")?,
            GateTarget::Iteration(n) => write!(f, "cannot complete iteration {}", n)?,
        }
        write!(
            f,
            ": {} task(s) have issues ({} unverified, {} failed acceptance criteria)",
            self.tasks.len(),
            self.unverified_count(),
            self.failed_count()
        )?;

        for task in &self.tasks {
            write!(f, "\n  task {} ({})", task.task_id, task.task_title)?;
            if !task.unverified.is_empty() {
                write!(f, "\n    unverified:")?;
                for ac in &task.unverified {
                    write!(f, "\n      [{}] {} ({})", ac.id, ac.description, ac.status)?;
                }
            }
            if !task.failed.is_empty() {
                write!(f, "\n    failed:")?;
                for ac in &task.failed {
                    write!(f, "\n      [{}] {}", ac.id, ac.description)?;
                    if !ac.notes.is_empty() {
                        write!(f, "\n        feedback: {}", ac.notes)?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criterion(id: &str, status: AcStatus, notes: &str) -> BlockingCriterion {
        BlockingCriterion {
            id: id.to_string(),
            task_id: "TP-task-1".to_string(),
            description: format!("criterion {}", id),
            status,
            notes: notes.to_string(),
        }
    }

    #[test]
    fn report_lists_ids_grouped_by_task() {
        let report = GateReport {
            target: GateTarget::Iteration(3),
            tasks: vec![BlockedTask {
                task_id: "TP-task-1".to_string(),
                task_title: "Login".to_string(),
                unverified: vec![criterion("TP-ac-1", AcStatus::NotStarted, "")],
                failed: vec![criterion("TP-ac-2", AcStatus::Failed, "returns 500")],
            }],
        };

        assert_eq!(report.criterion_ids(), vec!["TP-ac-1", "TP-ac-2"]);
        assert_eq!(report.unverified_count(), 1);
        assert_eq!(report.failed_count(), 1);

        let text = Error::GateBlocked(report).to_string();
        assert!(text.starts_with("cannot complete iteration 3"));
        assert!(text.contains("unverified:"));
        assert!(text.contains("feedback: returns 500"));
    }

    #[test]
    fn kind_matches_variant() {
        assert_eq!(Error::not_found("track x").kind(), ErrorKind::NotFound);
        assert_eq!(Error::invalid("cycle").kind(), ErrorKind::InvalidArgument);
        assert_eq!(Error::validation("empty").kind(), ErrorKind::Validation);
    }
}
