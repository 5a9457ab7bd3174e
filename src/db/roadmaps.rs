use rusqlite::{Connection, Row, TransactionBehavior};
use tracing::debug;

use super::sequence::{next_id, SequenceKind};
use super::{format_datetime, map_insert_error, now, parse_datetime, Repository};
use crate::error::{Error, Result};
use crate::events::{EntityKind, RepositoryEvent};
use crate::models::{CreateRoadmapInput, Roadmap, UpdateRoadmapInput};

const COLUMNS: &str = "id, vision, success_criteria, created_at, updated_at";

impl Repository {
    // ============================================================
    // Roadmap operations
    // ============================================================

    /// Assigns an id and stores a new roadmap, which becomes the active one.
    pub fn create_roadmap(&self, input: CreateRoadmapInput) -> Result<Roadmap> {
        let roadmap = {
            let mut conn = self.conn();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let id = next_id(&tx, SequenceKind::Roadmap)?;
            let roadmap = Roadmap::new(id, input, now())?;
            insert_roadmap(&tx, &roadmap)?;
            tx.commit()?;
            roadmap
        };
        self.notify([RepositoryEvent::Created {
            kind: EntityKind::Roadmap,
            id: roadmap.id.clone(),
        }]);
        Ok(roadmap)
    }

    pub fn save_roadmap(&self, roadmap: &Roadmap) -> Result<()> {
        {
            let conn = self.conn();
            insert_roadmap(&conn, roadmap)?;
        }
        self.notify([RepositoryEvent::Created {
            kind: EntityKind::Roadmap,
            id: roadmap.id.clone(),
        }]);
        Ok(())
    }

    pub fn get_roadmap(&self, id: &str) -> Result<Option<Roadmap>> {
        let conn = self.conn();
        load_roadmap(&conn, id)
    }

    /// The most recently created roadmap. Roadmaps created within the same
    /// microsecond are ordered by insertion.
    pub fn get_active_roadmap(&self) -> Result<Option<Roadmap>> {
        let conn = self.conn();
        active_roadmap(&conn)
    }

    pub fn list_roadmaps(&self) -> Result<Vec<Roadmap>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM roadmaps ORDER BY created_at, rowid",
            COLUMNS
        ))?;
        let roadmaps = stmt
            .query_map([], roadmap_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(roadmaps)
    }

    pub fn update_roadmap(&self, id: &str, input: UpdateRoadmapInput) -> Result<Roadmap> {
        let roadmap = {
            let conn = self.conn();
            let Some(mut roadmap) = load_roadmap(&conn, id)? else {
                return Err(Error::not_found(format!("roadmap {}", id)));
            };
            roadmap.apply(input, now())?;
            conn.execute(
                "UPDATE roadmaps SET vision = ?1, success_criteria = ?2, updated_at = ?3 WHERE id = ?4",
                (
                    &roadmap.vision,
                    &roadmap.success_criteria,
                    format_datetime(&roadmap.updated_at),
                    &roadmap.id,
                ),
            )?;
            roadmap
        };

        self.notify([RepositoryEvent::Updated {
            kind: EntityKind::Roadmap,
            id: roadmap.id.clone(),
        }]);
        Ok(roadmap)
    }

    /// Deletes the roadmap with its tracks. Tasks of those tracks survive
    /// without a track.
    pub fn delete_roadmap(&self, id: &str) -> Result<()> {
        let deleted = self.conn().execute("DELETE FROM roadmaps WHERE id = ?", [id])?;
        if deleted == 0 {
            return Err(Error::not_found(format!("roadmap {}", id)));
        }
        self.notify([RepositoryEvent::Deleted {
            kind: EntityKind::Roadmap,
            id: id.to_string(),
        }]);
        Ok(())
    }
}

fn insert_roadmap(conn: &Connection, roadmap: &Roadmap) -> Result<()> {
    conn.execute(
        "INSERT INTO roadmaps (id, vision, success_criteria, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        (
            &roadmap.id,
            &roadmap.vision,
            &roadmap.success_criteria,
            format_datetime(&roadmap.created_at),
            format_datetime(&roadmap.updated_at),
        ),
    )
    .map_err(|e| map_insert_error(e, || format!("roadmap {}", roadmap.id)))?;
    debug!(roadmap = %roadmap.id, "roadmap saved");
    Ok(())
}

pub(super) fn load_roadmap(conn: &Connection, id: &str) -> Result<Option<Roadmap>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM roadmaps WHERE id = ?", COLUMNS))?;
    let mut rows = stmt.query([id])?;
    match rows.next()? {
        Some(row) => Ok(Some(roadmap_from_row(row)?)),
        None => Ok(None),
    }
}

pub(super) fn active_roadmap(conn: &Connection) -> Result<Option<Roadmap>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM roadmaps ORDER BY created_at DESC, rowid DESC LIMIT 1",
        COLUMNS
    ))?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => Ok(Some(roadmap_from_row(row)?)),
        None => Ok(None),
    }
}

fn roadmap_from_row(row: &Row<'_>) -> rusqlite::Result<Roadmap> {
    Ok(Roadmap {
        id: row.get(0)?,
        vision: row.get(1)?,
        success_criteria: row.get(2)?,
        created_at: parse_datetime(3, &row.get::<_, String>(3)?)?,
        updated_at: parse_datetime(4, &row.get::<_, String>(4)?)?,
    })
}
