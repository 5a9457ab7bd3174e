use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{non_empty, require_non_empty};
use crate::error::{Error, Result};

/// An architecture decision record attached to a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adr {
    pub id: String,
    pub track_id: String,
    pub title: String,
    pub status: AdrStatus,
    pub context: String,
    pub decision: String,
    pub consequences: String,
    pub alternatives: Option<String>,
    /// Set only when `status` is `Superseded`.
    pub superseded_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdrStatus {
    Proposed,
    Accepted,
    Deprecated,
    Superseded,
}

impl AdrStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Accepted => "accepted",
            Self::Deprecated => "deprecated",
            Self::Superseded => "superseded",
        }
    }
}

impl FromStr for AdrStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "proposed" => Ok(Self::Proposed),
            "accepted" => Ok(Self::Accepted),
            "deprecated" => Ok(Self::Deprecated),
            "superseded" => Ok(Self::Superseded),
            other => Err(Error::validation(format!(
                "invalid ADR status '{}': must be one of proposed, accepted, deprecated, superseded",
                other
            ))),
        }
    }
}

impl fmt::Display for AdrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Adr {
    pub fn new(id: impl Into<String>, input: CreateAdrInput, now: DateTime<Utc>) -> Result<Self> {
        let id = id.into();
        require_non_empty("ADR id", &id)?;
        require_non_empty("track id", &input.track_id)?;
        require_non_empty("title", &input.title)?;
        require_non_empty("context", &input.context)?;
        require_non_empty("decision", &input.decision)?;
        require_non_empty("consequences", &input.consequences)?;

        let status = input.status.unwrap_or(AdrStatus::Proposed);
        let superseded_by = non_empty(input.superseded_by);
        match (status, &superseded_by) {
            (AdrStatus::Superseded, None) => {
                return Err(Error::validation(
                    "superseded_by is required when status is superseded",
                ))
            }
            (AdrStatus::Superseded, Some(by)) if by == &id => {
                return Err(Error::validation("ADR cannot supersede itself"))
            }
            (AdrStatus::Superseded, Some(_)) => {}
            (_, Some(_)) => {
                return Err(Error::validation(
                    "superseded_by is only allowed when status is superseded",
                ))
            }
            (_, None) => {}
        }

        Ok(Self {
            id,
            track_id: input.track_id,
            title: input.title,
            status,
            context: input.context,
            decision: input.decision,
            consequences: input.consequences,
            alternatives: non_empty(input.alternatives),
            superseded_by,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn accept(&mut self, now: DateTime<Utc>) {
        self.set(AdrStatus::Accepted, None, now);
    }

    pub fn deprecate(&mut self, now: DateTime<Utc>) {
        self.set(AdrStatus::Deprecated, None, now);
    }

    pub fn supersede(&mut self, by: &str, now: DateTime<Utc>) -> Result<()> {
        require_non_empty("superseding ADR id", by)?;
        if by == self.id {
            return Err(Error::invalid(format!("ADR {} cannot supersede itself", self.id)));
        }
        self.set(AdrStatus::Superseded, Some(by.to_string()), now);
        Ok(())
    }

    pub fn apply(&mut self, input: UpdateAdrInput, now: DateTime<Utc>) -> Result<()> {
        if let Some(title) = input.title {
            require_non_empty("title", &title)?;
            self.title = title;
        }
        if let Some(context) = input.context {
            require_non_empty("context", &context)?;
            self.context = context;
        }
        if let Some(decision) = input.decision {
            require_non_empty("decision", &decision)?;
            self.decision = decision;
        }
        if let Some(consequences) = input.consequences {
            require_non_empty("consequences", &consequences)?;
            self.consequences = consequences;
        }
        if let Some(alternatives) = input.alternatives {
            self.alternatives = non_empty(Some(alternatives));
        }
        self.updated_at = now;
        Ok(())
    }

    fn set(&mut self, status: AdrStatus, superseded_by: Option<String>, now: DateTime<Utc>) {
        self.status = status;
        self.superseded_by = superseded_by;
        self.updated_at = now;
    }
}

/// Input for creating an ADR.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateAdrInput {
    pub track_id: String,
    pub title: String,
    pub context: String,
    pub decision: String,
    pub consequences: String,
    pub alternatives: Option<String>,
    /// Defaults to `Proposed`.
    pub status: Option<AdrStatus>,
    pub superseded_by: Option<String>,
}

/// Input for updating an ADR. Status goes through accept/deprecate/supersede.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAdrInput {
    pub title: Option<String>,
    pub context: Option<String>,
    pub decision: Option<String>,
    pub consequences: Option<String>,
    pub alternatives: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdrFilters {
    pub track_id: Option<String>,
    /// Empty means any status.
    #[serde(default)]
    pub statuses: Vec<AdrStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> CreateAdrInput {
        CreateAdrInput {
            track_id: "TP-track-1".to_string(),
            title: "Use SQLite".to_string(),
            context: "Need embedded storage".to_string(),
            decision: "Bundle SQLite".to_string(),
            consequences: "Single file per project".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn requires_decision_fields() {
        let mut missing = input();
        missing.consequences = " ".to_string();
        assert!(matches!(
            Adr::new("TP-adr-1", missing, Utc::now()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn superseded_status_needs_a_successor() {
        let mut superseded = input();
        superseded.status = Some(AdrStatus::Superseded);
        assert!(Adr::new("TP-adr-1", superseded.clone(), Utc::now()).is_err());

        superseded.superseded_by = Some("TP-adr-2".to_string());
        let adr = Adr::new("TP-adr-1", superseded, Utc::now()).unwrap();
        assert_eq!(adr.superseded_by.as_deref(), Some("TP-adr-2"));
    }

    #[test]
    fn supersede_records_successor_and_rejects_self() {
        let mut adr = Adr::new("TP-adr-1", input(), Utc::now()).unwrap();
        assert!(matches!(
            adr.supersede("TP-adr-1", Utc::now()),
            Err(Error::InvalidArgument(_))
        ));

        adr.supersede("TP-adr-2", Utc::now()).unwrap();
        assert_eq!(adr.status, AdrStatus::Superseded);
        assert_eq!(adr.superseded_by.as_deref(), Some("TP-adr-2"));
    }

    #[test]
    fn accepting_clears_successor() {
        let mut adr = Adr::new("TP-adr-1", input(), Utc::now()).unwrap();
        adr.supersede("TP-adr-2", Utc::now()).unwrap();
        adr.accept(Utc::now());
        assert_eq!(adr.status, AdrStatus::Accepted);
        assert!(adr.superseded_by.is_none());
    }
}
