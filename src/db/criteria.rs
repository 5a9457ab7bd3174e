use rusqlite::{params_from_iter, Connection, Row, TransactionBehavior};
use tracing::debug;

use super::sequence::{next_id, SequenceKind};
use super::{exists, format_datetime, map_insert_error, now, parse_datetime, parse_enum, Repository};
use crate::error::{Error, Result};
use crate::events::{EntityKind, RepositoryEvent};
use crate::models::{AcceptanceCriteria, CreateAcInput, FailedAcFilters, UpdateAcInput};

const COLUMNS: &str = "ac.id, ac.task_id, ac.description, ac.verification_type, \
                       ac.testing_instructions, ac.status, ac.notes, ac.created_at, ac.updated_at";

impl Repository {
    // ============================================================
    // Acceptance criteria operations
    // ============================================================

    pub fn create_ac(&self, input: CreateAcInput) -> Result<AcceptanceCriteria> {
        let ac = {
            let mut conn = self.conn();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let id = next_id(&tx, SequenceKind::Ac)?;
            let ac = AcceptanceCriteria::new(id, input, now())?;
            insert_ac(&tx, &ac)?;
            tx.commit()?;
            ac
        };
        self.notify([RepositoryEvent::Created {
            kind: EntityKind::AcceptanceCriteria,
            id: ac.id.clone(),
        }]);
        Ok(ac)
    }

    /// Stores a criterion built by the caller. Its task must exist.
    pub fn save_ac(&self, ac: &AcceptanceCriteria) -> Result<()> {
        insert_ac(&self.conn(), ac)?;
        self.notify([RepositoryEvent::Created {
            kind: EntityKind::AcceptanceCriteria,
            id: ac.id.clone(),
        }]);
        Ok(())
    }

    pub fn get_ac(&self, id: &str) -> Result<Option<AcceptanceCriteria>> {
        let conn = self.conn();
        load_ac(&conn, id)
    }

    /// Criteria of one task in creation order.
    pub fn list_ac(&self, task_id: &str) -> Result<Vec<AcceptanceCriteria>> {
        let conn = self.conn();
        criteria_for_task(&conn, task_id)
    }

    pub fn update_ac(&self, id: &str, input: UpdateAcInput) -> Result<AcceptanceCriteria> {
        let ac = {
            let conn = self.conn();
            let Some(mut ac) = load_ac(&conn, id)? else {
                return Err(Error::not_found(format!("acceptance criteria {}", id)));
            };
            ac.apply(input, now())?;
            conn.execute(
                "UPDATE acceptance_criteria
                 SET description = ?1, testing_instructions = ?2, verification_type = ?3, updated_at = ?4
                 WHERE id = ?5",
                (
                    &ac.description,
                    &ac.testing_instructions,
                    ac.verification_type.as_str(),
                    format_datetime(&ac.updated_at),
                    &ac.id,
                ),
            )?;
            ac
        };
        self.notify([RepositoryEvent::Updated {
            kind: EntityKind::AcceptanceCriteria,
            id: ac.id.clone(),
        }]);
        Ok(ac)
    }

    pub fn delete_ac(&self, id: &str) -> Result<()> {
        let deleted = self
            .conn()
            .execute("DELETE FROM acceptance_criteria WHERE id = ?", [id])?;
        if deleted == 0 {
            return Err(Error::not_found(format!("acceptance criteria {}", id)));
        }
        self.notify([RepositoryEvent::Deleted {
            kind: EntityKind::AcceptanceCriteria,
            id: id.to_string(),
        }]);
        Ok(())
    }

    /// Marks a criterion verified by a human. `note` records who and how.
    pub fn verify_ac(&self, id: &str, note: Option<&str>) -> Result<AcceptanceCriteria> {
        let note = note.map(str::to_string);
        self.transition_ac(id, |ac, now| {
            ac.verify(note, now);
            Ok(())
        })
    }

    pub fn verify_ac_automatically(
        &self,
        id: &str,
        note: Option<&str>,
    ) -> Result<AcceptanceCriteria> {
        let note = note.map(str::to_string);
        self.transition_ac(id, |ac, now| {
            ac.verify_automatically(note, now);
            Ok(())
        })
    }

    pub fn request_ac_review(&self, id: &str) -> Result<AcceptanceCriteria> {
        self.transition_ac(id, |ac, now| {
            ac.request_review(now);
            Ok(())
        })
    }

    /// Marks a criterion failed. The reason is required and kept in `notes`.
    pub fn fail_ac(&self, id: &str, reason: &str) -> Result<AcceptanceCriteria> {
        self.transition_ac(id, |ac, now| ac.fail(reason, now))
    }

    /// Skips a criterion. The reason is required and kept in `notes`.
    pub fn skip_ac(&self, id: &str, reason: &str) -> Result<AcceptanceCriteria> {
        self.transition_ac(id, |ac, now| ac.skip(reason, now))
    }

    pub fn reset_ac(&self, id: &str) -> Result<AcceptanceCriteria> {
        self.transition_ac(id, |ac, now| {
            ac.reset(now);
            Ok(())
        })
    }

    /// Criteria of every task currently in a track.
    pub fn list_ac_by_track(&self, track_id: &str) -> Result<Vec<AcceptanceCriteria>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM acceptance_criteria ac
             JOIN tasks t ON t.id = ac.task_id
             WHERE t.track_id = ?
             ORDER BY t.rank, t.created_at, ac.created_at, ac.rowid",
            COLUMNS
        ))?;
        let criteria = stmt
            .query_map([track_id], ac_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(criteria)
    }

    /// Criteria of every task in an iteration, in iteration order.
    pub fn list_ac_by_iteration(&self, number: i64) -> Result<Vec<AcceptanceCriteria>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM acceptance_criteria ac
             JOIN iteration_tasks it ON it.task_id = ac.task_id
             WHERE it.iteration_number = ?
             ORDER BY it.position, ac.created_at, ac.rowid",
            COLUMNS
        ))?;
        let criteria = stmt
            .query_map([number], ac_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(criteria)
    }

    /// Failed criteria narrowed by any combination of iteration, track and
    /// task.
    pub fn list_failed_ac(&self, filters: &FailedAcFilters) -> Result<Vec<AcceptanceCriteria>> {
        let conn = self.conn();
        let mut sql = format!(
            "SELECT DISTINCT {} FROM acceptance_criteria ac
             JOIN tasks t ON t.id = ac.task_id",
            COLUMNS
        );
        let mut params: Vec<rusqlite::types::Value> = Vec::new();
        if let Some(number) = filters.iteration {
            sql.push_str(" JOIN iteration_tasks it ON it.task_id = t.id AND it.iteration_number = ?");
            params.push(number.into());
        }
        sql.push_str(" WHERE ac.status = 'failed'");
        if let Some(track_id) = &filters.track_id {
            sql.push_str(" AND t.track_id = ?");
            params.push(track_id.clone().into());
        }
        if let Some(task_id) = &filters.task_id {
            sql.push_str(" AND t.id = ?");
            params.push(task_id.clone().into());
        }
        sql.push_str(" ORDER BY ac.task_id, ac.created_at, ac.id");

        let mut stmt = conn.prepare(&sql)?;
        let criteria = stmt
            .query_map(params_from_iter(params.iter()), ac_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(criteria)
    }

    fn transition_ac<F>(&self, id: &str, change: F) -> Result<AcceptanceCriteria>
    where
        F: FnOnce(&mut AcceptanceCriteria, chrono::DateTime<chrono::Utc>) -> Result<()>,
    {
        let (ac, from) = {
            let conn = self.conn();
            let Some(mut ac) = load_ac(&conn, id)? else {
                return Err(Error::not_found(format!("acceptance criteria {}", id)));
            };
            let from = ac.status;
            change(&mut ac, now())?;
            conn.execute(
                "UPDATE acceptance_criteria SET status = ?1, notes = ?2, updated_at = ?3 WHERE id = ?4",
                (
                    ac.status.as_str(),
                    &ac.notes,
                    format_datetime(&ac.updated_at),
                    &ac.id,
                ),
            )?;
            (ac, from)
        };
        debug!(ac = %ac.id, status = %ac.status, "acceptance criteria status set");
        self.notify([RepositoryEvent::AcStatusChanged {
            id: ac.id.clone(),
            from,
            to: ac.status,
        }]);
        Ok(ac)
    }
}

fn insert_ac(conn: &Connection, ac: &AcceptanceCriteria) -> Result<()> {
    if !exists(conn, "SELECT COUNT(*) FROM tasks WHERE id = ?", &ac.task_id)? {
        return Err(Error::not_found(format!("task {}", ac.task_id)));
    }
    conn.execute(
        "INSERT INTO acceptance_criteria
             (id, task_id, description, verification_type, testing_instructions, status, notes,
              created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        (
            &ac.id,
            &ac.task_id,
            &ac.description,
            ac.verification_type.as_str(),
            &ac.testing_instructions,
            ac.status.as_str(),
            &ac.notes,
            format_datetime(&ac.created_at),
            format_datetime(&ac.updated_at),
        ),
    )
    .map_err(|e| map_insert_error(e, || format!("acceptance criteria {}", ac.id)))?;
    debug!(ac = %ac.id, task = %ac.task_id, "acceptance criteria saved");
    Ok(())
}

fn load_ac(conn: &Connection, id: &str) -> Result<Option<AcceptanceCriteria>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM acceptance_criteria ac WHERE ac.id = ?",
        COLUMNS
    ))?;
    let mut rows = stmt.query([id])?;
    match rows.next()? {
        Some(row) => Ok(Some(ac_from_row(row)?)),
        None => Ok(None),
    }
}

pub(super) fn criteria_for_task(
    conn: &Connection,
    task_id: &str,
) -> Result<Vec<AcceptanceCriteria>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM acceptance_criteria ac WHERE ac.task_id = ?
         ORDER BY ac.created_at, ac.rowid",
        COLUMNS
    ))?;
    let criteria = stmt
        .query_map([task_id], ac_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(criteria)
}

fn ac_from_row(row: &Row<'_>) -> rusqlite::Result<AcceptanceCriteria> {
    Ok(AcceptanceCriteria {
        id: row.get(0)?,
        task_id: row.get(1)?,
        description: row.get(2)?,
        verification_type: parse_enum(3, &row.get::<_, String>(3)?)?,
        testing_instructions: row.get(4)?,
        status: parse_enum(5, &row.get::<_, String>(5)?)?,
        notes: row.get(6)?,
        created_at: parse_datetime(7, &row.get::<_, String>(7)?)?,
        updated_at: parse_datetime(8, &row.get::<_, String>(8)?)?,
    })
}
