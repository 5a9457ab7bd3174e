use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{require_non_empty, TaskStatus, Track};
use crate::error::Result;

/// The product vision that owns a set of tracks.
///
/// There is no explicit "active" flag: the most recently created roadmap in a
/// project is the active one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roadmap {
    pub id: String,
    pub vision: String,
    pub success_criteria: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Roadmap {
    pub fn new(
        id: impl Into<String>,
        input: CreateRoadmapInput,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let id = id.into();
        require_non_empty("roadmap id", &id)?;
        require_non_empty("vision", &input.vision)?;
        require_non_empty("success criteria", &input.success_criteria)?;

        Ok(Self {
            id,
            vision: input.vision,
            success_criteria: input.success_criteria,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply(&mut self, input: UpdateRoadmapInput, now: DateTime<Utc>) -> Result<()> {
        if let Some(vision) = input.vision {
            require_non_empty("vision", &vision)?;
            self.vision = vision;
        }
        if let Some(success_criteria) = input.success_criteria {
            require_non_empty("success criteria", &success_criteria)?;
            self.success_criteria = success_criteria;
        }
        self.updated_at = now;
        Ok(())
    }
}

/// Input for creating a roadmap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoadmapInput {
    pub vision: String,
    pub success_criteria: String,
}

/// Input for updating a roadmap. All fields are optional for partial updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRoadmapInput {
    pub vision: Option<String>,
    pub success_criteria: Option<String>,
}

/// Task counts for one track, used in roadmap overviews.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub todo: usize,
    pub in_progress: usize,
    pub review: usize,
    pub blocked: usize,
    pub waiting: usize,
    pub done: usize,
}

impl TaskCounts {
    pub fn add(&mut self, status: TaskStatus, n: usize) {
        match status {
            TaskStatus::Todo => self.todo += n,
            TaskStatus::InProgress => self.in_progress += n,
            TaskStatus::Review => self.review += n,
            TaskStatus::Blocked => self.blocked += n,
            TaskStatus::Waiting => self.waiting += n,
            TaskStatus::Done => self.done += n,
        }
    }

    pub fn total(&self) -> usize {
        self.todo + self.in_progress + self.review + self.blocked + self.waiting + self.done
    }
}

/// A track with its task counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSummary {
    #[serde(flatten)]
    pub track: Track,
    pub tasks: TaskCounts,
}

/// The active roadmap with its tracks in rank order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoadmapOverview {
    #[serde(flatten)]
    pub roadmap: Roadmap,
    pub tracks: Vec<TrackSummary>,
}
