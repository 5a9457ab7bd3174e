use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{require_non_empty, validate_rank, DEFAULT_RANK};
use crate::error::{Error, Result};

/// A stream of related work under a roadmap.
///
/// Tracks form a dependency graph (`A` depends on `B` means `B` should land
/// first). The graph is kept acyclic by the repository; a track can never list
/// itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub roadmap_id: String,
    pub title: String,
    pub description: String,
    pub status: TrackStatus,
    /// 1-1000, lower is more urgent.
    pub rank: i64,
    /// Ids of the tracks this one depends on, sorted.
    pub dependencies: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrackStatus {
    NotStarted,
    InProgress,
    Blocked,
    Waiting,
    Done,
}

impl TrackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::InProgress => "in-progress",
            Self::Blocked => "blocked",
            Self::Waiting => "waiting",
            Self::Done => "done",
        }
    }
}

impl FromStr for TrackStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "not-started" => Ok(Self::NotStarted),
            "in-progress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "waiting" => Ok(Self::Waiting),
            "done" => Ok(Self::Done),
            other => Err(Error::validation(format!(
                "invalid track status '{}': must be one of not-started, in-progress, blocked, waiting, done",
                other
            ))),
        }
    }
}

impl fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Track {
    pub fn new(id: impl Into<String>, input: CreateTrackInput, now: DateTime<Utc>) -> Result<Self> {
        let id = id.into();
        require_non_empty("track id", &id)?;
        require_non_empty("roadmap id", &input.roadmap_id)?;
        require_non_empty("title", &input.title)?;
        let rank = validate_rank(input.rank.unwrap_or(DEFAULT_RANK))?;

        let mut dependencies = input.dependencies;
        if dependencies.iter().any(|d| d == &id) {
            return Err(Error::validation("track cannot depend on itself"));
        }
        dependencies.sort();
        dependencies.dedup();

        Ok(Self {
            id,
            roadmap_id: input.roadmap_id,
            title: input.title,
            description: input.description.unwrap_or_default(),
            status: input.status.unwrap_or(TrackStatus::NotStarted),
            rank,
            dependencies,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply(&mut self, input: UpdateTrackInput, now: DateTime<Utc>) -> Result<()> {
        if let Some(title) = input.title {
            require_non_empty("title", &title)?;
            self.title = title;
        }
        if let Some(description) = input.description {
            self.description = description;
        }
        if let Some(status) = input.status {
            self.status = status;
        }
        if let Some(rank) = input.rank {
            self.rank = validate_rank(rank)?;
        }
        self.updated_at = now;
        Ok(())
    }
}

/// Input for creating a track.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTrackInput {
    pub roadmap_id: String,
    pub title: String,
    pub description: Option<String>,
    /// Defaults to `NotStarted`.
    pub status: Option<TrackStatus>,
    /// Defaults to [`DEFAULT_RANK`].
    pub rank: Option<i64>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Input for updating a track. Dependencies change through the dedicated
/// repository operations so every new edge goes through the cycle check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTrackInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TrackStatus>,
    pub rank: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackFilters {
    /// Empty means any status.
    #[serde(default)]
    pub statuses: Vec<TrackStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> CreateTrackInput {
        CreateTrackInput {
            roadmap_id: "roadmap-1".to_string(),
            title: "Storage".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_status_and_rank() {
        let track = Track::new("TP-track-1", input(), Utc::now()).unwrap();
        assert_eq!(track.status, TrackStatus::NotStarted);
        assert_eq!(track.rank, DEFAULT_RANK);
        assert_eq!(track.created_at, track.updated_at);
    }

    #[test]
    fn rejects_self_dependency() {
        let mut input = input();
        input.dependencies = vec!["TP-track-1".to_string()];
        let err = Track::new("TP-track-1", input, Utc::now()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn rejects_rank_out_of_range() {
        let mut input = input();
        input.rank = Some(0);
        assert!(Track::new("TP-track-1", input, Utc::now()).is_err());
    }

    #[test]
    fn parses_status_strings() {
        assert_eq!("in-progress".parse::<TrackStatus>().unwrap(), TrackStatus::InProgress);
        assert!("complete".parse::<TrackStatus>().is_err());
    }
}
