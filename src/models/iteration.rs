use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{non_empty, require_non_empty, validate_rank, DEFAULT_RANK};
use crate::error::{Error, Result};

/// A sprint-style grouping of tasks across tracks.
///
/// Numbers start at 1 and are never handed out twice within a project, even
/// after an iteration is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iteration {
    pub number: i64,
    pub name: String,
    pub goal: String,
    pub deliverable: Option<String>,
    /// Member tasks in the order they were added.
    pub task_ids: Vec<String>,
    pub status: IterationStatus,
    /// Ordering among planned iterations, lower comes first.
    pub rank: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    Planned,
    Current,
    Complete,
}

impl IterationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Current => "current",
            Self::Complete => "complete",
        }
    }
}

impl FromStr for IterationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "planned" => Ok(Self::Planned),
            "current" => Ok(Self::Current),
            "complete" => Ok(Self::Complete),
            other => Err(Error::validation(format!(
                "invalid iteration status '{}': must be one of planned, current, complete",
                other
            ))),
        }
    }
}

impl fmt::Display for IterationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Iteration {
    pub fn new(number: i64, input: CreateIterationInput, now: DateTime<Utc>) -> Result<Self> {
        if number < 1 {
            return Err(Error::validation(format!(
                "iteration number must be at least 1, got {}",
                number
            )));
        }
        require_non_empty("name", &input.name)?;
        let rank = validate_rank(input.rank.unwrap_or(DEFAULT_RANK))?;

        Ok(Self {
            number,
            name: input.name,
            goal: input.goal.unwrap_or_default(),
            deliverable: non_empty(input.deliverable),
            task_ids: Vec::new(),
            status: IterationStatus::Planned,
            rank,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Planned to current.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != IterationStatus::Planned {
            return Err(Error::invalid(format!(
                "iteration {} is {}, only planned iterations can be started",
                self.number, self.status
            )));
        }
        self.status = IterationStatus::Current;
        self.started_at = Some(now);
        self.completed_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// Current to complete. The acceptance criteria gate is checked by the
    /// repository before this is called.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != IterationStatus::Current {
            return Err(Error::invalid(format!(
                "iteration {} is {}, only the current iteration can be completed",
                self.number, self.status
            )));
        }
        self.status = IterationStatus::Complete;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Moves the iteration back to planned from any status.
    pub fn plan(&mut self, now: DateTime<Utc>) {
        self.status = IterationStatus::Planned;
        self.started_at = None;
        self.completed_at = None;
        self.updated_at = now;
    }

    /// Steps aside for another iteration being started. `started_at` is kept
    /// so the earlier run stays visible.
    pub fn demote(&mut self, now: DateTime<Utc>) {
        if self.status == IterationStatus::Current {
            self.status = IterationStatus::Planned;
            self.completed_at = None;
            self.updated_at = now;
        }
    }

    pub fn apply(&mut self, input: UpdateIterationInput, now: DateTime<Utc>) -> Result<()> {
        if let Some(name) = input.name {
            require_non_empty("name", &name)?;
            self.name = name;
        }
        if let Some(goal) = input.goal {
            self.goal = goal;
        }
        if let Some(deliverable) = input.deliverable {
            self.deliverable = non_empty(Some(deliverable));
        }
        if let Some(rank) = input.rank {
            self.rank = validate_rank(rank)?;
        }
        self.updated_at = now;
        Ok(())
    }
}

/// Input for creating an iteration. The number is assigned by the repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateIterationInput {
    pub name: String,
    pub goal: Option<String>,
    pub deliverable: Option<String>,
    pub rank: Option<i64>,
}

/// Input for updating an iteration. All fields are optional for partial updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateIterationInput {
    pub name: Option<String>,
    pub goal: Option<String>,
    pub deliverable: Option<String>,
    pub rank: Option<i64>,
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn iteration() -> Iteration {
        Iteration::new(
            1,
            CreateIterationInput {
                name: "Foundations".to_string(),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn number_must_be_positive() {
        let input = CreateIterationInput {
            name: "Zero".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            Iteration::new(0, input, Utc::now()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn start_then_complete_records_timestamps() {
        let mut it = iteration();
        let started = Utc::now();
        it.start(started).unwrap();
        assert_eq!(it.status, IterationStatus::Current);
        assert_eq!(it.started_at, Some(started));

        let finished = started + Duration::hours(2);
        it.complete(finished).unwrap();
        assert_eq!(it.status, IterationStatus::Complete);
        assert_eq!(it.completed_at, Some(finished));
    }

    #[test]
    fn illegal_transitions_are_invalid_arguments() {
        let mut it = iteration();
        assert!(matches!(it.complete(Utc::now()), Err(Error::InvalidArgument(_))));

        it.start(Utc::now()).unwrap();
        assert!(matches!(it.start(Utc::now()), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn plan_clears_both_timestamps() {
        let mut it = iteration();
        it.start(Utc::now()).unwrap();
        it.complete(Utc::now()).unwrap();
        it.plan(Utc::now());
        assert_eq!(it.status, IterationStatus::Planned);
        assert!(it.started_at.is_none());
        assert!(it.completed_at.is_none());
    }

    #[test]
    fn demote_only_touches_current() {
        let mut it = iteration();
        it.start(Utc::now()).unwrap();
        it.demote(Utc::now());
        assert_eq!(it.status, IterationStatus::Planned);
        assert!(it.started_at.is_some());

        let mut done = iteration();
        done.start(Utc::now()).unwrap();
        done.complete(Utc::now()).unwrap();
        done.demote(Utc::now());
        assert_eq!(done.status, IterationStatus::Complete);
    }
}
