use std::collections::HashMap;

use super::iterations::load_iteration;
use super::roadmaps::active_roadmap;
use super::tasks::{columns_as, load_task, task_from_row};
use super::tracks::list_tracks;
use super::{parse_enum, Repository};
use crate::error::{Error, Result};
use crate::models::{
    Iteration, RoadmapOverview, Task, TaskCounts, TaskStatus, TrackFilters, TrackSummary,
};

impl Repository {
    // ============================================================
    // Cross-entity queries
    // ============================================================

    /// Unfinished tasks that belong to no iteration, oldest first.
    pub fn get_backlog_tasks(&self) -> Result<Vec<Task>> {
        let conn = self.conn();
        let columns = columns_as("t");
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tasks t
             LEFT JOIN iteration_tasks it ON it.task_id = t.id
             WHERE it.task_id IS NULL AND t.status != 'done'
             ORDER BY t.created_at, t.rowid",
            columns
        ))?;
        let backlog = stmt
            .query_map([], task_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(backlog)
    }

    /// Iterations containing `task_id`, ascending by number.
    pub fn get_iterations_for_task(&self, task_id: &str) -> Result<Vec<Iteration>> {
        let conn = self.conn();
        if load_task(&conn, task_id)?.is_none() {
            return Err(Error::not_found(format!("task {}", task_id)));
        }
        let mut stmt = conn.prepare(
            "SELECT iteration_number FROM iteration_tasks WHERE task_id = ?
             ORDER BY iteration_number",
        )?;
        let numbers = stmt
            .query_map([task_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;

        let mut iterations = Vec::with_capacity(numbers.len());
        for number in numbers {
            if let Some(iteration) = load_iteration(&conn, number)? {
                iterations.push(iteration);
            }
        }
        Ok(iterations)
    }

    /// The active roadmap with its tracks in rank order and a count of each
    /// track's tasks by status. `None` when the project has no roadmap.
    pub fn get_roadmap_overview(&self) -> Result<Option<RoadmapOverview>> {
        let conn = self.conn();
        let Some(roadmap) = active_roadmap(&conn)? else {
            return Ok(None);
        };
        let tracks = list_tracks(&conn, &roadmap.id, &TrackFilters::default())?;

        let mut stmt = conn.prepare(
            "SELECT t.track_id, t.status, COUNT(*)
             FROM tasks t
             JOIN tracks tr ON tr.id = t.track_id
             WHERE tr.roadmap_id = ?
             GROUP BY t.track_id, t.status",
        )?;
        let rows = stmt.query_map([&roadmap.id], |row| {
            let track_id: String = row.get(0)?;
            let status: TaskStatus = parse_enum(1, &row.get::<_, String>(1)?)?;
            let count: i64 = row.get(2)?;
            Ok((track_id, status, count))
        })?;

        let mut counts: HashMap<String, TaskCounts> = HashMap::new();
        for row in rows {
            let (track_id, status, count) = row?;
            counts.entry(track_id).or_default().add(status, count as usize);
        }

        let tracks = tracks
            .into_iter()
            .map(|track| TrackSummary {
                tasks: counts.remove(&track.id).unwrap_or_default(),
                track,
            })
            .collect();
        Ok(Some(RoadmapOverview { roadmap, tracks }))
    }
}
