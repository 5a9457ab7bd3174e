use rusqlite::{params_from_iter, Connection, Row, TransactionBehavior};
use tracing::{debug, warn};

use super::criteria::criteria_for_task;
use super::sequence::{next_id, SequenceKind};
use super::{
    exists, format_datetime, map_insert_error, now, parse_datetime, parse_enum, placeholders,
    Repository,
};
use crate::error::{Error, Result};
use crate::events::{EntityKind, RepositoryEvent};
use crate::gate;
use crate::models::{CreateTaskInput, Task, TaskFilters, TaskStatus, UpdateTaskInput};

const COLUMNS: &str =
    "id, track_id, title, description, status, rank, branch, created_at, updated_at";

/// [`COLUMNS`] qualified with a table alias, for joins.
pub(super) fn columns_as(alias: &str) -> String {
    COLUMNS
        .split(", ")
        .map(|c| format!("{}.{}", alias, c))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Repository {
    // ============================================================
    // Task operations
    // ============================================================

    pub fn create_task(&self, input: CreateTaskInput) -> Result<Task> {
        let task = {
            let mut conn = self.conn();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let id = next_id(&tx, SequenceKind::Task)?;
            let task = Task::new(id, input, now())?;
            insert_task(&tx, &task)?;
            tx.commit()?;
            task
        };
        self.notify([RepositoryEvent::Created {
            kind: EntityKind::Task,
            id: task.id.clone(),
        }]);
        Ok(task)
    }

    /// Stores a task built by the caller. Its track must exist.
    pub fn save_task(&self, task: &Task) -> Result<()> {
        insert_task(&self.conn(), task)?;
        self.notify([RepositoryEvent::Created {
            kind: EntityKind::Task,
            id: task.id.clone(),
        }]);
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let conn = self.conn();
        load_task(&conn, id)
    }

    /// Tasks matching `filters`, ordered by rank, then creation time.
    pub fn list_tasks(&self, filters: &TaskFilters) -> Result<Vec<Task>> {
        let conn = self.conn();
        let mut sql = format!("SELECT {} FROM tasks WHERE 1 = 1", COLUMNS);
        let mut params: Vec<String> = Vec::new();
        if let Some(track_id) = &filters.track_id {
            sql.push_str(" AND track_id = ?");
            params.push(track_id.clone());
        }
        if !filters.statuses.is_empty() {
            sql.push_str(&format!(" AND status IN ({})", placeholders(filters.statuses.len())));
            params.extend(filters.statuses.iter().map(|s| s.as_str().to_string()));
        }
        sql.push_str(" ORDER BY rank, created_at, rowid");

        let mut stmt = conn.prepare(&sql)?;
        let tasks = stmt
            .query_map(params_from_iter(params.iter()), task_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    pub fn update_task(&self, id: &str, input: UpdateTaskInput) -> Result<Task> {
        let task = {
            let conn = self.conn();
            let Some(mut task) = load_task(&conn, id)? else {
                return Err(Error::not_found(format!("task {}", id)));
            };
            task.apply(input, now())?;
            conn.execute(
                "UPDATE tasks SET title = ?1, description = ?2, rank = ?3, branch = ?4, updated_at = ?5
                 WHERE id = ?6",
                (
                    &task.title,
                    &task.description,
                    task.rank,
                    &task.branch,
                    format_datetime(&task.updated_at),
                    &task.id,
                ),
            )?;
            task
        };
        self.notify([RepositoryEvent::Updated {
            kind: EntityKind::Task,
            id: task.id.clone(),
        }]);
        Ok(task)
    }

    /// Deletes a task with its acceptance criteria and iteration memberships.
    pub fn delete_task(&self, id: &str) -> Result<()> {
        let deleted = self.conn().execute("DELETE FROM tasks WHERE id = ?", [id])?;
        if deleted == 0 {
            return Err(Error::not_found(format!("task {}", id)));
        }
        self.notify([RepositoryEvent::Deleted {
            kind: EntityKind::Task,
            id: id.to_string(),
        }]);
        Ok(())
    }

    pub fn move_task(&self, task_id: &str, track_id: &str) -> Result<Task> {
        let task = {
            let conn = self.conn();
            let Some(mut task) = load_task(&conn, task_id)? else {
                return Err(Error::not_found(format!("task {}", task_id)));
            };
            if !exists(&conn, "SELECT COUNT(*) FROM tracks WHERE id = ?", &track_id)? {
                return Err(Error::not_found(format!("track {}", track_id)));
            }
            task.track_id = Some(track_id.to_string());
            task.updated_at = now();
            conn.execute(
                "UPDATE tasks SET track_id = ?1, updated_at = ?2 WHERE id = ?3",
                (track_id, format_datetime(&task.updated_at), &task.id),
            )?;
            task
        };
        debug!(task = %task.id, track = %track_id, "task moved");
        self.notify([RepositoryEvent::Updated {
            kind: EntityKind::Task,
            id: task.id.clone(),
        }]);
        Ok(task)
    }

    /// Changes a task's status.
    ///
    /// Moving to `done` is refused with `GateBlocked` while any of the task's
    /// acceptance criteria is blocking; the check and the write share one
    /// transaction. Every other transition is unguarded.
    pub fn set_task_status(&self, id: &str, status: TaskStatus) -> Result<Task> {
        let result = {
            let mut conn = self.conn();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let Some(mut task) = load_task(&tx, id)? else {
                return Err(Error::not_found(format!("task {}", id)));
            };

            let checked = if status == TaskStatus::Done {
                gate::check_task(&task, &criteria_for_task(&tx, &task.id)?)
            } else {
                Ok(())
            };

            match checked {
                Ok(()) => {
                    let from = task.status;
                    task.transition_to(status, now());
                    write_status(&tx, &task)?;
                    tx.commit()?;
                    Ok((task, from))
                }
                Err(e) => Err(e),
            }
        };

        match result {
            Ok((task, from)) => {
                self.notify([RepositoryEvent::TaskStatusChanged {
                    id: task.id.clone(),
                    from,
                    to: task.status,
                }]);
                Ok(task)
            }
            Err(Error::GateBlocked(report)) => {
                warn!(
                    task = %id,
                    blocking = report.criterion_ids().len(),
                    "task completion blocked"
                );
                self.notify([RepositoryEvent::GateBlocked {
                    target: format!("task {}", id),
                    blocking: report.criterion_ids(),
                }]);
                Err(Error::GateBlocked(report))
            }
            Err(e) => Err(e),
        }
    }
}

fn insert_task(conn: &Connection, task: &Task) -> Result<()> {
    if let Some(track_id) = &task.track_id {
        if !exists(conn, "SELECT COUNT(*) FROM tracks WHERE id = ?", track_id)? {
            return Err(Error::not_found(format!("track {}", track_id)));
        }
    }
    conn.execute(
        "INSERT INTO tasks (id, track_id, title, description, status, rank, branch, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        (
            &task.id,
            &task.track_id,
            &task.title,
            &task.description,
            task.status.as_str(),
            task.rank,
            &task.branch,
            format_datetime(&task.created_at),
            format_datetime(&task.updated_at),
        ),
    )
    .map_err(|e| map_insert_error(e, || format!("task {}", task.id)))?;
    debug!(task = %task.id, "task saved");
    Ok(())
}

pub(super) fn write_status(conn: &Connection, task: &Task) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
        (task.status.as_str(), format_datetime(&task.updated_at), &task.id),
    )?;
    Ok(())
}

pub(super) fn load_task(conn: &Connection, id: &str) -> Result<Option<Task>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM tasks WHERE id = ?", COLUMNS))?;
    let mut rows = stmt.query([id])?;
    match rows.next()? {
        Some(row) => Ok(Some(task_from_row(row)?)),
        None => Ok(None),
    }
}

/// Maps a row selected with [`COLUMNS`] or [`columns_as`].
pub(super) fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        track_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: parse_enum(4, &row.get::<_, String>(4)?)?,
        rank: row.get(5)?,
        branch: row.get(6)?,
        created_at: parse_datetime(7, &row.get::<_, String>(7)?)?,
        updated_at: parse_datetime(8, &row.get::<_, String>(8)?)?,
    })
}
