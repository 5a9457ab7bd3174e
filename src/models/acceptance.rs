use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{non_empty, require_non_empty};
use crate::error::{Error, Result};

/// A single verifiable condition attached to a task.
///
/// Criteria in a blocking status (`NotStarted`, `PendingHumanReview`,
/// `Failed`) prevent the owning task from reaching `done` and any iteration
/// containing that task from completing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceCriteria {
    pub id: String,
    pub task_id: String,
    pub description: String,
    pub verification_type: VerificationType,
    /// Step-by-step guidance for whoever verifies the criterion.
    pub testing_instructions: Option<String>,
    pub status: AcStatus,
    /// Failure feedback, skip reason, or verification note.
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcStatus {
    NotStarted,
    PendingHumanReview,
    Verified,
    AutomaticallyVerified,
    Failed,
    Skipped,
}

impl AcStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::PendingHumanReview => "pending_human_review",
            Self::Verified => "verified",
            Self::AutomaticallyVerified => "automatically_verified",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Whether a criterion in this status prevents completion.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            Self::NotStarted | Self::PendingHumanReview | Self::Failed
        )
    }
}

impl FromStr for AcStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "pending_human_review" => Ok(Self::PendingHumanReview),
            "verified" => Ok(Self::Verified),
            "automatically_verified" => Ok(Self::AutomaticallyVerified),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(Error::validation(format!(
                "invalid acceptance criteria status '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for AcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is expected to verify a criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationType {
    /// A human checks it.
    Manual,
    /// The coding agent can check it itself (tests, lints, ...).
    Automated,
}

impl VerificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Automated => "automated",
        }
    }
}

impl FromStr for VerificationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "manual" => Ok(Self::Manual),
            "automated" => Ok(Self::Automated),
            other => Err(Error::validation(format!(
                "invalid verification type '{}': must be manual or automated",
                other
            ))),
        }
    }
}

impl fmt::Display for VerificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AcceptanceCriteria {
    /// Creates a criterion in `NotStarted` status.
    pub fn new(id: impl Into<String>, input: CreateAcInput, now: DateTime<Utc>) -> Result<Self> {
        let id = id.into();
        require_non_empty("acceptance criteria id", &id)?;
        require_non_empty("task id", &input.task_id)?;
        require_non_empty("description", &input.description)?;

        Ok(Self {
            id,
            task_id: input.task_id,
            description: input.description,
            verification_type: input.verification_type.unwrap_or(VerificationType::Manual),
            testing_instructions: non_empty(input.testing_instructions),
            status: AcStatus::NotStarted,
            notes: String::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Human verification. The optional note records who verified it and how.
    pub fn verify(&mut self, note: Option<String>, now: DateTime<Utc>) {
        self.set(AcStatus::Verified, note.unwrap_or_default(), now);
    }

    pub fn verify_automatically(&mut self, note: Option<String>, now: DateTime<Utc>) {
        self.set(AcStatus::AutomaticallyVerified, note.unwrap_or_default(), now);
    }

    pub fn request_review(&mut self, now: DateTime<Utc>) {
        self.set(AcStatus::PendingHumanReview, String::new(), now);
    }

    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) -> Result<()> {
        require_non_empty("failure reason", reason)?;
        self.set(AcStatus::Failed, reason.to_string(), now);
        Ok(())
    }

    pub fn skip(&mut self, reason: &str, now: DateTime<Utc>) -> Result<()> {
        require_non_empty("skip reason", reason)?;
        self.set(AcStatus::Skipped, reason.to_string(), now);
        Ok(())
    }

    /// Back to `NotStarted`, e.g. after the task was reworked.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.set(AcStatus::NotStarted, String::new(), now);
    }

    /// Edits description or instructions; the status is left alone.
    pub fn apply(&mut self, input: UpdateAcInput, now: DateTime<Utc>) -> Result<()> {
        if let Some(description) = input.description {
            require_non_empty("description", &description)?;
            self.description = description;
        }
        if let Some(instructions) = input.testing_instructions {
            self.testing_instructions = non_empty(Some(instructions));
        }
        if let Some(verification_type) = input.verification_type {
            self.verification_type = verification_type;
        }
        self.updated_at = now;
        Ok(())
    }

    fn set(&mut self, status: AcStatus, notes: String, now: DateTime<Utc>) {
        self.status = status;
        self.notes = notes;
        self.updated_at = now;
    }
}

/// Input for creating an acceptance criterion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateAcInput {
    pub task_id: String,
    pub description: String,
    /// Defaults to `Manual`.
    pub verification_type: Option<VerificationType>,
    pub testing_instructions: Option<String>,
}

/// Input for editing an acceptance criterion. Status changes go through the
/// verify/fail/skip operations instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAcInput {
    pub description: Option<String>,
    /// An empty string clears the instructions.
    pub testing_instructions: Option<String>,
    pub verification_type: Option<VerificationType>,
}

/// Narrows [`list_failed_ac`](crate::db::Repository::list_failed_ac). Filters
/// combine with AND; all `None` lists every failed criterion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailedAcFilters {
    pub iteration: Option<i64>,
    pub track_id: Option<String>,
    pub task_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criterion() -> AcceptanceCriteria {
        AcceptanceCriteria::new(
            "TP-ac-1",
            CreateAcInput {
                task_id: "TP-task-1".to_string(),
                description: "Login returns a session token".to_string(),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn starts_not_started_and_manual() {
        let ac = criterion();
        assert_eq!(ac.status, AcStatus::NotStarted);
        assert_eq!(ac.verification_type, VerificationType::Manual);
        assert!(ac.status.is_blocking());
    }

    #[test]
    fn fail_and_skip_need_a_reason() {
        let mut ac = criterion();
        assert!(ac.fail("  ", Utc::now()).is_err());
        assert!(ac.skip("", Utc::now()).is_err());
        assert_eq!(ac.status, AcStatus::NotStarted);

        ac.fail("token expires immediately", Utc::now()).unwrap();
        assert_eq!(ac.status, AcStatus::Failed);
        assert_eq!(ac.notes, "token expires immediately");
    }

    #[test]
    fn verification_clears_failure_notes() {
        let mut ac = criterion();
        ac.fail("broken", Utc::now()).unwrap();
        ac.verify(None, Utc::now());
        assert_eq!(ac.status, AcStatus::Verified);
        assert!(ac.notes.is_empty());
        assert!(!ac.status.is_blocking());
    }

    #[test]
    fn blocking_statuses() {
        let blocking: Vec<_> = [
            AcStatus::NotStarted,
            AcStatus::PendingHumanReview,
            AcStatus::Verified,
            AcStatus::AutomaticallyVerified,
            AcStatus::Failed,
            AcStatus::Skipped,
        ]
        .into_iter()
        .filter(AcStatus::is_blocking)
        .collect();

        assert_eq!(
            blocking,
            vec![AcStatus::NotStarted, AcStatus::PendingHumanReview, AcStatus::Failed]
        );
    }

    #[test]
    fn editing_keeps_status() {
        let mut ac = criterion();
        ac.skip("covered elsewhere", Utc::now()).unwrap();
        ac.apply(
            UpdateAcInput {
                description: Some("Login returns a token".to_string()),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(ac.status, AcStatus::Skipped);
        assert_eq!(ac.description, "Login returns a token");
    }
}
