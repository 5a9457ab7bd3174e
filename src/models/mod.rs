//! Domain models for trackplan.
//!
//! # Hierarchy
//!
//! - [`Roadmap`]: the product vision. The most recently created roadmap is the
//!   active one.
//! - [`Track`]: a stream of related work under a roadmap. Tracks depend on
//!   other tracks and the dependency relation must stay acyclic.
//! - [`Task`]: a unit of work inside a track.
//! - [`AcceptanceCriteria`]: a verifiable condition on a task. Unresolved
//!   criteria block the task (and any iteration holding it) from completing.
//! - [`Adr`]: an architecture decision record attached to a track.
//! - [`Iteration`]: a sprint-style grouping of tasks across tracks. At most one
//!   iteration is `current` at a time.
//!
//! Every constructor validates its input and takes the timestamp from the
//! caller, so nothing here touches storage or the clock.

mod acceptance;
mod adr;
mod iteration;
mod roadmap;
mod task;
mod track;

pub use acceptance::*;
pub use adr::*;
pub use iteration::*;
pub use roadmap::*;
pub use task::*;
pub use track::*;

use crate::error::{Error, Result};

/// Rank assigned when the caller does not choose one.
pub const DEFAULT_RANK: i64 = 500;
pub const MIN_RANK: i64 = 1;
pub const MAX_RANK: i64 = 1000;

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(format!("{} must be non-empty", field)));
    }
    Ok(())
}

pub(crate) fn validate_rank(rank: i64) -> Result<i64> {
    if !(MIN_RANK..=MAX_RANK).contains(&rank) {
        return Err(Error::validation(format!(
            "rank must be between {} and {}, got {}",
            MIN_RANK, MAX_RANK, rank
        )));
    }
    Ok(rank)
}

/// Empty optional text is stored as absent.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_bounds_are_inclusive() {
        assert!(validate_rank(1).is_ok());
        assert!(validate_rank(1000).is_ok());
        assert!(validate_rank(0).is_err());
        assert!(validate_rank(1001).is_err());
    }

    #[test]
    fn whitespace_is_empty() {
        assert!(require_non_empty("title", "   ").is_err());
        assert_eq!(non_empty(Some(" ".to_string())), None);
        assert_eq!(non_empty(Some("x".to_string())), Some("x".to_string()));
    }
}
