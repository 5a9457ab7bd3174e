use rusqlite::{Connection, Row, TransactionBehavior};
use tracing::{debug, info, warn};

use super::criteria::criteria_for_task;
use super::sequence::{advance_sequence, next_sequence_number, SequenceKind};
use super::tasks::{columns_as, load_task, task_from_row, write_status};
use super::{
    format_datetime, map_insert_error, now, parse_datetime, parse_enum, parse_optional_datetime,
    Repository,
};
use crate::error::{Error, Result};
use crate::events::{EntityKind, RepositoryEvent};
use crate::gate;
use crate::models::{
    AcceptanceCriteria, CreateIterationInput, Iteration, IterationStatus, Task, TaskStatus,
    UpdateIterationInput,
};

const COLUMNS: &str = "number, name, goal, deliverable, status, rank, started_at, completed_at, \
                       created_at, updated_at";

impl Repository {
    // ============================================================
    // Iteration operations
    // ============================================================

    /// Creates a planned iteration numbered one past the highest number ever
    /// used in this project.
    pub fn create_iteration(&self, input: CreateIterationInput) -> Result<Iteration> {
        let iteration = {
            let mut conn = self.conn();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let number = allocate_number(&tx)?;
            let iteration = Iteration::new(number, input, now())?;
            insert_iteration(&tx, &iteration)?;
            tx.commit()?;
            iteration
        };
        self.notify([RepositoryEvent::Created {
            kind: EntityKind::Iteration,
            id: iteration.number.to_string(),
        }]);
        Ok(iteration)
    }

    /// Stores an iteration built by the caller, including its task list.
    ///
    /// Only planned or current iterations are accepted; completion always goes
    /// through [`Repository::complete_iteration`] so the gate and cascade run.
    pub fn save_iteration(&self, iteration: &Iteration) -> Result<()> {
        if iteration.status == IterationStatus::Complete {
            return Err(Error::invalid(format!(
                "iteration {} is complete; complete it through complete_iteration",
                iteration.number
            )));
        }
        {
            let mut conn = self.conn();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if iteration.status == IterationStatus::Current {
                if let Some(current) = current_iteration(&tx)? {
                    return Err(Error::invalid(format!(
                        "iteration {} is already current",
                        current.number
                    )));
                }
            }
            insert_iteration(&tx, iteration)?;
            advance_sequence(&tx, SequenceKind::Iteration, iteration.number)?;
            for task_id in &iteration.task_ids {
                add_member(&tx, iteration.number, task_id)?;
            }
            tx.commit()?;
        }
        self.notify([RepositoryEvent::Created {
            kind: EntityKind::Iteration,
            id: iteration.number.to_string(),
        }]);
        Ok(())
    }

    pub fn get_iteration(&self, number: i64) -> Result<Option<Iteration>> {
        let conn = self.conn();
        load_iteration(&conn, number)
    }

    /// All iterations by rank, ties broken by number.
    pub fn list_iterations(&self) -> Result<Vec<Iteration>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM iterations ORDER BY rank, number",
            COLUMNS
        ))?;
        let mut iterations = stmt
            .query_map([], iteration_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for iteration in &mut iterations {
            iteration.task_ids = member_ids(&conn, iteration.number)?;
        }
        Ok(iterations)
    }

    pub fn update_iteration(&self, number: i64, input: UpdateIterationInput) -> Result<Iteration> {
        let iteration = {
            let conn = self.conn();
            let mut iteration = require_iteration(&conn, number)?;
            iteration.apply(input, now())?;
            write_iteration(&conn, &iteration)?;
            iteration
        };
        self.notify([RepositoryEvent::Updated {
            kind: EntityKind::Iteration,
            id: number.to_string(),
        }]);
        Ok(iteration)
    }

    /// Deletes an iteration. Its tasks are kept; the number is not reused.
    pub fn delete_iteration(&self, number: i64) -> Result<()> {
        let deleted = self
            .conn()
            .execute("DELETE FROM iterations WHERE number = ?", [number])?;
        if deleted == 0 {
            return Err(Error::not_found(format!("iteration {}", number)));
        }
        self.notify([RepositoryEvent::Deleted {
            kind: EntityKind::Iteration,
            id: number.to_string(),
        }]);
        Ok(())
    }

    /// Appends a task to an iteration. Adding a member again is a no-op.
    pub fn add_task_to_iteration(&self, number: i64, task_id: &str) -> Result<()> {
        {
            let mut conn = self.conn();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut iteration = require_iteration(&tx, number)?;
            add_member(&tx, number, task_id)?;
            iteration.updated_at = now();
            write_iteration(&tx, &iteration)?;
            tx.commit()?;
        }
        debug!(iteration = number, task = %task_id, "task added to iteration");
        self.notify([RepositoryEvent::Updated {
            kind: EntityKind::Iteration,
            id: number.to_string(),
        }]);
        Ok(())
    }

    pub fn remove_task_from_iteration(&self, number: i64, task_id: &str) -> Result<()> {
        {
            let mut conn = self.conn();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut iteration = require_iteration(&tx, number)?;
            let removed = tx.execute(
                "DELETE FROM iteration_tasks WHERE iteration_number = ?1 AND task_id = ?2",
                (number, task_id),
            )?;
            if removed == 0 {
                return Err(Error::not_found(format!(
                    "task {} in iteration {}",
                    task_id, number
                )));
            }
            iteration.updated_at = now();
            write_iteration(&tx, &iteration)?;
            tx.commit()?;
        }
        self.notify([RepositoryEvent::Updated {
            kind: EntityKind::Iteration,
            id: number.to_string(),
        }]);
        Ok(())
    }

    /// Member tasks in the order they were added.
    pub fn get_iteration_tasks(&self, number: i64) -> Result<Vec<Task>> {
        let conn = self.conn();
        require_iteration(&conn, number)?;
        member_tasks(&conn, number)
    }

    /// Makes a planned iteration current, demoting whichever iteration was
    /// current before.
    pub fn start_iteration(&self, number: i64) -> Result<Iteration> {
        let (iteration, demoted) = {
            let mut conn = self.conn();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut iteration = require_iteration(&tx, number)?;
            let now = now();
            iteration.start(now)?;

            let demoted = match current_iteration(&tx)? {
                Some(mut previous) => {
                    previous.demote(now);
                    write_iteration(&tx, &previous)?;
                    Some(previous.number)
                }
                None => None,
            };
            write_iteration(&tx, &iteration)?;
            tx.commit()?;
            (iteration, demoted)
        };

        info!(iteration = number, demoted = ?demoted, "iteration started");
        self.notify([RepositoryEvent::IterationStarted { number, demoted }]);
        Ok(iteration)
    }

    /// Completes the current iteration.
    ///
    /// Refused with `GateBlocked` if any member task has a blocking acceptance
    /// criterion; the report groups them by task. On success every member
    /// task is set to `done` in the same transaction.
    pub fn complete_iteration(&self, number: i64) -> Result<Iteration> {
        let result = {
            let mut conn = self.conn();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut iteration = require_iteration(&tx, number)?;
            let now = now();
            iteration.complete(now)?;

            let members = member_tasks(&tx, number)?;
            let criteria = members
                .iter()
                .map(|task| criteria_for_task(&tx, &task.id))
                .collect::<Result<Vec<Vec<AcceptanceCriteria>>>>()?;
            let checked = gate::check_iteration(
                number,
                members.iter().zip(criteria.iter().map(Vec::as_slice)),
            );

            match checked {
                Ok(()) => {
                    let mut changed = Vec::new();
                    for mut task in members {
                        if !task.is_done() {
                            let from = task.status;
                            task.transition_to(TaskStatus::Done, now);
                            write_status(&tx, &task)?;
                            changed.push((task.id, from));
                        }
                    }
                    write_iteration(&tx, &iteration)?;
                    tx.commit()?;
                    Ok((iteration, changed))
                }
                Err(e) => Err(e),
            }
        };

        match result {
            Ok((iteration, changed)) => {
                info!(iteration = number, tasks_completed = changed.len(), "iteration completed");
                let completed = changed.len();
                let mut events: Vec<RepositoryEvent> = changed
                    .into_iter()
                    .map(|(id, from)| RepositoryEvent::TaskStatusChanged {
                        id,
                        from,
                        to: TaskStatus::Done,
                    })
                    .collect();
                events.push(RepositoryEvent::IterationCompleted {
                    number,
                    tasks_completed: completed,
                });
                self.notify(events);
                Ok(iteration)
            }
            Err(Error::GateBlocked(report)) => {
                warn!(
                    iteration = number,
                    unverified = report.unverified_count(),
                    failed = report.failed_count(),
                    "iteration completion blocked"
                );
                self.notify([RepositoryEvent::GateBlocked {
                    target: format!("iteration {}", number),
                    blocking: report.criterion_ids(),
                }]);
                Err(Error::GateBlocked(report))
            }
            Err(e) => Err(e),
        }
    }

    /// Moves an iteration back to planned, clearing its start and completion
    /// times.
    pub fn plan_iteration(&self, number: i64) -> Result<Iteration> {
        let iteration = {
            let conn = self.conn();
            let mut iteration = require_iteration(&conn, number)?;
            iteration.plan(now());
            write_iteration(&conn, &iteration)?;
            iteration
        };
        self.notify([RepositoryEvent::Updated {
            kind: EntityKind::Iteration,
            id: number.to_string(),
        }]);
        Ok(iteration)
    }

    pub fn get_current_iteration(&self) -> Result<Option<Iteration>> {
        let conn = self.conn();
        current_iteration(&conn)
    }

    /// The planned iteration with the lowest rank, ties broken by number.
    pub fn get_next_planned_iteration(&self) -> Result<Option<Iteration>> {
        let conn = self.conn();
        let number: Option<i64> = {
            let mut stmt = conn.prepare(
                "SELECT number FROM iterations WHERE status = 'planned'
                 ORDER BY rank, number LIMIT 1",
            )?;
            let mut rows = stmt.query([])?;
            match rows.next()? {
                Some(row) => Some(row.get(0)?),
                None => None,
            }
        };
        match number {
            Some(number) => load_iteration(&conn, number),
            None => Ok(None),
        }
    }
}

/// One past the larger of the counter and the highest stored number.
fn allocate_number(conn: &Connection) -> Result<i64> {
    let max: i64 = conn.query_row("SELECT COALESCE(MAX(number), 0) FROM iterations", [], |row| {
        row.get(0)
    })?;
    let number = next_sequence_number(conn, SequenceKind::Iteration)?.max(max + 1);
    advance_sequence(conn, SequenceKind::Iteration, number)?;
    Ok(number)
}

fn insert_iteration(conn: &Connection, iteration: &Iteration) -> Result<()> {
    conn.execute(
        "INSERT INTO iterations
             (number, name, goal, deliverable, status, rank, started_at, completed_at,
              created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        (
            iteration.number,
            &iteration.name,
            &iteration.goal,
            &iteration.deliverable,
            iteration.status.as_str(),
            iteration.rank,
            iteration.started_at.as_ref().map(format_datetime),
            iteration.completed_at.as_ref().map(format_datetime),
            format_datetime(&iteration.created_at),
            format_datetime(&iteration.updated_at),
        ),
    )
    .map_err(|e| map_insert_error(e, || format!("iteration {}", iteration.number)))?;
    debug!(iteration = iteration.number, "iteration saved");
    Ok(())
}

fn write_iteration(conn: &Connection, iteration: &Iteration) -> Result<()> {
    conn.execute(
        "UPDATE iterations
         SET name = ?1, goal = ?2, deliverable = ?3, status = ?4, rank = ?5,
             started_at = ?6, completed_at = ?7, updated_at = ?8
         WHERE number = ?9",
        (
            &iteration.name,
            &iteration.goal,
            &iteration.deliverable,
            iteration.status.as_str(),
            iteration.rank,
            iteration.started_at.as_ref().map(format_datetime),
            iteration.completed_at.as_ref().map(format_datetime),
            format_datetime(&iteration.updated_at),
            iteration.number,
        ),
    )?;
    Ok(())
}

fn add_member(conn: &Connection, number: i64, task_id: &str) -> Result<()> {
    if load_task(conn, task_id)?.is_none() {
        return Err(Error::not_found(format!("task {}", task_id)));
    }
    conn.execute(
        "INSERT OR IGNORE INTO iteration_tasks (iteration_number, task_id, position)
         SELECT ?1, ?2, COALESCE(MAX(position), 0) + 1
         FROM iteration_tasks WHERE iteration_number = ?1",
        (number, task_id),
    )?;
    Ok(())
}

fn require_iteration(conn: &Connection, number: i64) -> Result<Iteration> {
    load_iteration(conn, number)?.ok_or_else(|| Error::not_found(format!("iteration {}", number)))
}

pub(super) fn load_iteration(conn: &Connection, number: i64) -> Result<Option<Iteration>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM iterations WHERE number = ?",
        COLUMNS
    ))?;
    let mut rows = stmt.query([number])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let mut iteration = iteration_from_row(row)?;
    iteration.task_ids = member_ids(conn, number)?;
    Ok(Some(iteration))
}

fn current_iteration(conn: &Connection) -> Result<Option<Iteration>> {
    let number: Option<i64> = {
        let mut stmt = conn.prepare("SELECT number FROM iterations WHERE status = 'current'")?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Some(row.get(0)?),
            None => None,
        }
    };
    match number {
        Some(number) => load_iteration(conn, number),
        None => Ok(None),
    }
}

fn member_ids(conn: &Connection, number: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT task_id FROM iteration_tasks WHERE iteration_number = ? ORDER BY position",
    )?;
    let ids = stmt
        .query_map([number], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

fn member_tasks(conn: &Connection, number: i64) -> Result<Vec<Task>> {
    let columns = columns_as("t");
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM tasks t
         JOIN iteration_tasks it ON it.task_id = t.id
         WHERE it.iteration_number = ?
         ORDER BY it.position",
        columns
    ))?;
    let tasks = stmt
        .query_map([number], task_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tasks)
}

fn iteration_from_row(row: &Row<'_>) -> rusqlite::Result<Iteration> {
    Ok(Iteration {
        number: row.get(0)?,
        name: row.get(1)?,
        goal: row.get(2)?,
        deliverable: row.get(3)?,
        task_ids: Vec::new(),
        status: parse_enum(4, &row.get::<_, String>(4)?)?,
        rank: row.get(5)?,
        started_at: parse_optional_datetime(6, row.get(6)?)?,
        completed_at: parse_optional_datetime(7, row.get(7)?)?,
        created_at: parse_datetime(8, &row.get::<_, String>(8)?)?,
        updated_at: parse_datetime(9, &row.get::<_, String>(9)?)?,
    })
}
