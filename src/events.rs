//! Notifications emitted by the repository after a write commits.
//!
//! Observers are informational: they run after the transaction, cannot fail
//! the operation and cannot veto it.

use serde::Serialize;
use tracing::{info, warn};

use crate::models::{AcStatus, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Roadmap,
    Track,
    Task,
    AcceptanceCriteria,
    Iteration,
    Adr,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Roadmap => "roadmap",
            Self::Track => "track",
            Self::Task => "task",
            Self::AcceptanceCriteria => "acceptance_criteria",
            Self::Iteration => "iteration",
            Self::Adr => "adr",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RepositoryEvent {
    Created { kind: EntityKind, id: String },
    Updated { kind: EntityKind, id: String },
    Deleted { kind: EntityKind, id: String },
    TaskStatusChanged { id: String, from: TaskStatus, to: TaskStatus },
    AcStatusChanged { id: String, from: AcStatus, to: AcStatus },
    IterationStarted { number: i64, demoted: Option<i64> },
    IterationCompleted { number: i64, tasks_completed: usize },
    /// A completion was refused by an acceptance criteria gate.
    GateBlocked { target: String, blocking: Vec<String> },
}

pub trait RepositoryObserver: Send + Sync {
    fn notify(&self, event: &RepositoryEvent);
}

/// Writes every event as a structured log record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RepositoryObserver for TracingObserver {
    fn notify(&self, event: &RepositoryEvent) {
        match event {
            RepositoryEvent::Created { kind, id } => {
                info!(entity = kind.as_str(), id = %id, "created")
            }
            RepositoryEvent::Updated { kind, id } => {
                info!(entity = kind.as_str(), id = %id, "updated")
            }
            RepositoryEvent::Deleted { kind, id } => {
                info!(entity = kind.as_str(), id = %id, "deleted")
            }
            RepositoryEvent::TaskStatusChanged { id, from, to } => {
                info!(task = %id, from = %from, to = %to, "task status changed")
            }
            RepositoryEvent::AcStatusChanged { id, from, to } => {
                info!(ac = %id, from = %from, to = %to, "acceptance criteria status changed")
            }
            RepositoryEvent::IterationStarted { number, demoted } => {
                info!(iteration = number, demoted = ?demoted, "iteration started")
            }
            RepositoryEvent::IterationCompleted {
                number,
                tasks_completed,
            } => info!(iteration = number, tasks_completed, "iteration completed"),
            RepositoryEvent::GateBlocked { target, blocking } => {
                warn!(target_entity = %target, blocking = ?blocking, "completion blocked")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_a_tag() {
        let event = RepositoryEvent::IterationStarted {
            number: 2,
            demoted: Some(1),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "iteration_started");
        assert_eq!(json["demoted"], 1);
    }
}
