use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{non_empty, require_non_empty, validate_rank, DEFAULT_RANK};
use crate::error::{Error, Result};

/// A unit of work inside a track.
///
/// A task cannot reach `Done` while any of its acceptance criteria is still
/// blocking; the repository enforces that gate; the entity itself allows any
/// transition, including reopening a finished task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Owning track. Cleared when the track is deleted; the task survives.
    pub track_id: Option<String>,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    /// 1-1000, lower is more urgent.
    pub rank: i64,
    /// Git branch carrying the work, if any.
    pub branch: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Review,
    Blocked,
    Waiting,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in-progress",
            Self::Review => "review",
            Self::Blocked => "blocked",
            Self::Waiting => "waiting",
            Self::Done => "done",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "todo" => Ok(Self::Todo),
            "in-progress" => Ok(Self::InProgress),
            "review" => Ok(Self::Review),
            "blocked" => Ok(Self::Blocked),
            "waiting" => Ok(Self::Waiting),
            "done" => Ok(Self::Done),
            other => Err(Error::validation(format!(
                "invalid task status '{}': must be one of todo, in-progress, review, blocked, waiting, done",
                other
            ))),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Task {
    pub fn new(id: impl Into<String>, input: CreateTaskInput, now: DateTime<Utc>) -> Result<Self> {
        let id = id.into();
        require_non_empty("task id", &id)?;
        require_non_empty("track id", &input.track_id)?;
        require_non_empty("title", &input.title)?;
        let rank = validate_rank(input.rank.unwrap_or(DEFAULT_RANK))?;

        Ok(Self {
            id,
            track_id: Some(input.track_id),
            title: input.title,
            description: input.description.unwrap_or_default(),
            status: input.status.unwrap_or(TaskStatus::Todo),
            rank,
            branch: non_empty(input.branch),
            created_at: now,
            updated_at: now,
        })
    }

    /// Moves the task to `status`. Any status may follow any other.
    pub fn transition_to(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }

    pub fn apply(&mut self, input: UpdateTaskInput, now: DateTime<Utc>) -> Result<()> {
        if let Some(title) = input.title {
            require_non_empty("title", &title)?;
            self.title = title;
        }
        if let Some(description) = input.description {
            self.description = description;
        }
        if let Some(rank) = input.rank {
            self.rank = validate_rank(rank)?;
        }
        if let Some(branch) = input.branch {
            // An empty branch clears it.
            self.branch = non_empty(Some(branch));
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTaskInput {
    pub track_id: String,
    pub title: String,
    pub description: Option<String>,
    /// Defaults to `Todo`. Creating a task directly as `Done` is allowed since a
    /// new task has no acceptance criteria yet.
    pub status: Option<TaskStatus>,
    pub rank: Option<i64>,
    pub branch: Option<String>,
}

/// Input for updating a task. All fields are optional for partial updates.
///
/// Status and track are deliberately absent: they change through
/// `set_task_status` (gated) and `move_task`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTaskInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub rank: Option<i64>,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilters {
    pub track_id: Option<String>,
    /// Empty means any status.
    #[serde(default)]
    pub statuses: Vec<TaskStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(title: &str) -> CreateTaskInput {
        CreateTaskInput {
            track_id: "TP-track-1".to_string(),
            title: title.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn rejects_empty_title() {
        let err = Task::new("TP-task-1", input(""), Utc::now()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn sets_both_timestamps_from_caller() {
        let now = Utc::now();
        let task = Task::new("TP-task-1", input("Write parser"), now).unwrap();
        assert_eq!(task.created_at, now);
        assert_eq!(task.updated_at, now);
        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(task.track_id.as_deref(), Some("TP-track-1"));
    }

    #[test]
    fn empty_branch_clears_it() {
        let mut task = Task::new("TP-task-1", input("Write parser"), Utc::now()).unwrap();
        task.apply(
            UpdateTaskInput {
                branch: Some("feat/parser".to_string()),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(task.branch.as_deref(), Some("feat/parser"));

        task.apply(
            UpdateTaskInput {
                branch: Some(String::new()),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        assert!(task.branch.is_none());
    }

    #[test]
    fn unknown_status_is_a_validation_error() {
        assert!(matches!("finished".parse::<TaskStatus>(), Err(Error::Validation(_))));
    }
}
