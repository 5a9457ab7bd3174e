use std::collections::HashMap;

use rusqlite::{params_from_iter, Connection, Row, TransactionBehavior};
use tracing::debug;

use super::roadmaps::load_roadmap;
use super::sequence::{next_id, SequenceKind};
use super::{
    format_datetime, map_insert_error, now, parse_datetime, parse_enum, placeholders, Repository,
};
use crate::error::{Error, Result};
use crate::events::{EntityKind, RepositoryEvent};
use crate::graph::DependencyGraph;
use crate::models::{CreateTrackInput, Track, TrackFilters, UpdateTrackInput};

const COLUMNS: &str = "id, roadmap_id, title, description, status, rank, created_at, updated_at";

impl Repository {
    // ============================================================
    // Track operations
    // ============================================================

    /// Assigns an id and stores a new track with its dependencies.
    pub fn create_track(&self, input: CreateTrackInput) -> Result<Track> {
        let track = {
            let mut conn = self.conn();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let id = next_id(&tx, SequenceKind::Track)?;
            let track = Track::new(id, input, now())?;
            insert_track(&tx, &track)?;
            tx.commit()?;
            track
        };
        self.notify([RepositoryEvent::Created {
            kind: EntityKind::Track,
            id: track.id.clone(),
        }]);
        Ok(track)
    }

    /// Stores a track built by the caller. Every listed dependency goes
    /// through the same checks as [`add_track_dependency`](Self::add_track_dependency);
    /// nothing is written if one fails.
    pub fn save_track(&self, track: &Track) -> Result<()> {
        {
            let mut conn = self.conn();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            insert_track(&tx, track)?;
            tx.commit()?;
        }
        self.notify([RepositoryEvent::Created {
            kind: EntityKind::Track,
            id: track.id.clone(),
        }]);
        Ok(())
    }

    pub fn get_track(&self, id: &str) -> Result<Option<Track>> {
        let conn = self.conn();
        load_track(&conn, id)
    }

    /// Tracks of a roadmap ordered by rank, then id.
    pub fn list_tracks(&self, roadmap_id: &str, filters: &TrackFilters) -> Result<Vec<Track>> {
        let conn = self.conn();
        list_tracks(&conn, roadmap_id, filters)
    }

    pub fn update_track(&self, id: &str, input: UpdateTrackInput) -> Result<Track> {
        let track = {
            let conn = self.conn();
            let Some(mut track) = load_track(&conn, id)? else {
                return Err(Error::not_found(format!("track {}", id)));
            };
            track.apply(input, now())?;
            conn.execute(
                "UPDATE tracks SET title = ?1, description = ?2, status = ?3, rank = ?4, updated_at = ?5
                 WHERE id = ?6",
                (
                    &track.title,
                    &track.description,
                    track.status.as_str(),
                    track.rank,
                    format_datetime(&track.updated_at),
                    &track.id,
                ),
            )?;
            track
        };
        self.notify([RepositoryEvent::Updated {
            kind: EntityKind::Track,
            id: track.id.clone(),
        }]);
        Ok(track)
    }

    /// Deletes a track with its ADRs and dependency edges. Its tasks are kept
    /// and lose their track.
    pub fn delete_track(&self, id: &str) -> Result<()> {
        let deleted = self.conn().execute("DELETE FROM tracks WHERE id = ?", [id])?;
        if deleted == 0 {
            return Err(Error::not_found(format!("track {}", id)));
        }
        self.notify([RepositoryEvent::Deleted {
            kind: EntityKind::Track,
            id: id.to_string(),
        }]);
        Ok(())
    }

    /// Records that `track_id` depends on `depends_on_id`.
    ///
    /// Fails with `InvalidArgument` for a self edge, an edge across roadmaps,
    /// or an edge that would close a cycle; with `NotFound` if either track
    /// does not exist. Adding an existing edge is a no-op.
    pub fn add_track_dependency(&self, track_id: &str, depends_on_id: &str) -> Result<()> {
        {
            let mut conn = self.conn();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            add_dependency(&tx, track_id, depends_on_id)?;
            touch_track(&tx, track_id)?;
            tx.commit()?;
        }
        self.notify([RepositoryEvent::Updated {
            kind: EntityKind::Track,
            id: track_id.to_string(),
        }]);
        Ok(())
    }

    pub fn remove_track_dependency(&self, track_id: &str, depends_on_id: &str) -> Result<()> {
        {
            let conn = self.conn();
            let removed = conn.execute(
                "DELETE FROM track_dependencies WHERE track_id = ?1 AND depends_on_id = ?2",
                (track_id, depends_on_id),
            )?;
            if removed == 0 {
                return Err(Error::not_found(format!(
                    "dependency {} -> {}",
                    track_id, depends_on_id
                )));
            }
            touch_track(&conn, track_id)?;
        }
        self.notify([RepositoryEvent::Updated {
            kind: EntityKind::Track,
            id: track_id.to_string(),
        }]);
        Ok(())
    }

    /// Ids of the tracks `track_id` depends on, sorted.
    pub fn get_track_dependencies(&self, track_id: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        if load_track_row(&conn, track_id)?.is_none() {
            return Err(Error::not_found(format!("track {}", track_id)));
        }
        load_dependencies(&conn, track_id)
    }

    /// Fails with `InvalidArgument` if a dependency cycle is reachable from
    /// `track_id`.
    pub fn validate_no_cycles(&self, track_id: &str) -> Result<()> {
        let conn = self.conn();
        let Some(track) = load_track_row(&conn, track_id)? else {
            return Err(Error::not_found(format!("track {}", track_id)));
        };
        roadmap_graph(&conn, &track.roadmap_id)?.validate_no_cycles(track_id)
    }
}

fn insert_track(conn: &Connection, track: &Track) -> Result<()> {
    if load_roadmap(conn, &track.roadmap_id)?.is_none() {
        return Err(Error::not_found(format!("roadmap {}", track.roadmap_id)));
    }
    conn.execute(
        "INSERT INTO tracks (id, roadmap_id, title, description, status, rank, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        (
            &track.id,
            &track.roadmap_id,
            &track.title,
            &track.description,
            track.status.as_str(),
            track.rank,
            format_datetime(&track.created_at),
            format_datetime(&track.updated_at),
        ),
    )
    .map_err(|e| map_insert_error(e, || format!("track {}", track.id)))?;

    for dep in &track.dependencies {
        add_dependency(conn, &track.id, dep)?;
    }
    debug!(track = %track.id, dependencies = track.dependencies.len(), "track saved");
    Ok(())
}

fn add_dependency(conn: &Connection, track_id: &str, depends_on_id: &str) -> Result<()> {
    if track_id == depends_on_id {
        return Err(Error::invalid(format!("track {} cannot depend on itself", track_id)));
    }
    let Some(track) = load_track_row(conn, track_id)? else {
        return Err(Error::not_found(format!("track {}", track_id)));
    };
    let Some(target) = load_track_row(conn, depends_on_id)? else {
        return Err(Error::not_found(format!("track {}", depends_on_id)));
    };
    if track.roadmap_id != target.roadmap_id {
        return Err(Error::invalid(format!(
            "track {} and {} belong to different roadmaps",
            track_id, depends_on_id
        )));
    }

    roadmap_graph(conn, &track.roadmap_id)?.check_new_edge(track_id, depends_on_id)?;

    conn.execute(
        "INSERT OR IGNORE INTO track_dependencies (track_id, depends_on_id) VALUES (?1, ?2)",
        (track_id, depends_on_id),
    )?;
    debug!(track = %track_id, depends_on = %depends_on_id, "track dependency added");
    Ok(())
}

fn touch_track(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE tracks SET updated_at = ?1 WHERE id = ?2",
        (format_datetime(&now()), id),
    )?;
    Ok(())
}

/// Dependency graph of every track in a roadmap.
fn roadmap_graph(conn: &Connection, roadmap_id: &str) -> Result<DependencyGraph> {
    let mut stmt = conn.prepare("SELECT id FROM tracks WHERE roadmap_id = ? ORDER BY id")?;
    let nodes = stmt
        .query_map([roadmap_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT d.track_id, d.depends_on_id
         FROM track_dependencies d
         JOIN tracks t ON t.id = d.track_id
         WHERE t.roadmap_id = ?
         ORDER BY d.track_id, d.depends_on_id",
    )?;
    let edges = stmt
        .query_map([roadmap_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<(String, String)>, _>>()?;

    Ok(DependencyGraph::from_edges(nodes, edges))
}

pub(super) fn load_track(conn: &Connection, id: &str) -> Result<Option<Track>> {
    let Some(mut track) = load_track_row(conn, id)? else {
        return Ok(None);
    };
    track.dependencies = load_dependencies(conn, id)?;
    Ok(Some(track))
}

/// Track without its dependencies.
fn load_track_row(conn: &Connection, id: &str) -> Result<Option<Track>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM tracks WHERE id = ?", COLUMNS))?;
    let mut rows = stmt.query([id])?;
    match rows.next()? {
        Some(row) => Ok(Some(track_from_row(row)?)),
        None => Ok(None),
    }
}

fn load_dependencies(conn: &Connection, id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT depends_on_id FROM track_dependencies WHERE track_id = ? ORDER BY depends_on_id",
    )?;
    let deps = stmt
        .query_map([id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(deps)
}

pub(super) fn list_tracks(
    conn: &Connection,
    roadmap_id: &str,
    filters: &TrackFilters,
) -> Result<Vec<Track>> {
    let mut sql = format!("SELECT {} FROM tracks WHERE roadmap_id = ?", COLUMNS);
    let mut params: Vec<String> = vec![roadmap_id.to_string()];
    if !filters.statuses.is_empty() {
        sql.push_str(&format!(" AND status IN ({})", placeholders(filters.statuses.len())));
        params.extend(filters.statuses.iter().map(|s| s.as_str().to_string()));
    }
    sql.push_str(" ORDER BY rank, id");

    let mut stmt = conn.prepare(&sql)?;
    let mut tracks = stmt
        .query_map(params_from_iter(params.iter()), track_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT d.track_id, d.depends_on_id
         FROM track_dependencies d
         JOIN tracks t ON t.id = d.track_id
         WHERE t.roadmap_id = ?
         ORDER BY d.depends_on_id",
    )?;
    let mut deps: HashMap<String, Vec<String>> = HashMap::new();
    let rows = stmt.query_map([roadmap_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (track_id, depends_on) = row?;
        deps.entry(track_id).or_default().push(depends_on);
    }
    for track in &mut tracks {
        track.dependencies = deps.remove(&track.id).unwrap_or_default();
    }
    Ok(tracks)
}

fn track_from_row(row: &Row<'_>) -> rusqlite::Result<Track> {
    Ok(Track {
        id: row.get(0)?,
        roadmap_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: parse_enum(4, &row.get::<_, String>(4)?)?,
        rank: row.get(5)?,
        dependencies: Vec::new(),
        created_at: parse_datetime(6, &row.get::<_, String>(6)?)?,
        updated_at: parse_datetime(7, &row.get::<_, String>(7)?)?,
    })
}
