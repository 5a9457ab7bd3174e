use rusqlite::{params_from_iter, Connection, Row, TransactionBehavior};
use tracing::debug;

use super::sequence::{next_id, SequenceKind};
use super::{
    exists, format_datetime, map_insert_error, now, parse_datetime, parse_enum, placeholders,
    Repository,
};
use crate::error::{Error, Result};
use crate::events::{EntityKind, RepositoryEvent};
use crate::models::{Adr, AdrFilters, CreateAdrInput, UpdateAdrInput};

const COLUMNS: &str = "id, track_id, title, status, context, decision, consequences, alternatives, \
                       superseded_by, created_at, updated_at";

impl Repository {
    // ============================================================
    // ADR operations
    // ============================================================

    pub fn create_adr(&self, input: CreateAdrInput) -> Result<Adr> {
        let adr = {
            let mut conn = self.conn();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let id = next_id(&tx, SequenceKind::Adr)?;
            let adr = Adr::new(id, input, now())?;
            insert_adr(&tx, &adr)?;
            tx.commit()?;
            adr
        };
        self.notify([RepositoryEvent::Created {
            kind: EntityKind::Adr,
            id: adr.id.clone(),
        }]);
        Ok(adr)
    }

    pub fn save_adr(&self, adr: &Adr) -> Result<()> {
        insert_adr(&self.conn(), adr)?;
        self.notify([RepositoryEvent::Created {
            kind: EntityKind::Adr,
            id: adr.id.clone(),
        }]);
        Ok(())
    }

    pub fn get_adr(&self, id: &str) -> Result<Option<Adr>> {
        let conn = self.conn();
        load_adr(&conn, id)
    }

    /// ADRs matching `filters` in creation order.
    pub fn list_adrs(&self, filters: &AdrFilters) -> Result<Vec<Adr>> {
        let conn = self.conn();
        let mut sql = format!("SELECT {} FROM adrs WHERE 1 = 1", COLUMNS);
        let mut params: Vec<String> = Vec::new();
        if let Some(track_id) = &filters.track_id {
            sql.push_str(" AND track_id = ?");
            params.push(track_id.clone());
        }
        if !filters.statuses.is_empty() {
            sql.push_str(&format!(" AND status IN ({})", placeholders(filters.statuses.len())));
            params.extend(filters.statuses.iter().map(|s| s.as_str().to_string()));
        }
        sql.push_str(" ORDER BY created_at, rowid");

        let mut stmt = conn.prepare(&sql)?;
        let adrs = stmt
            .query_map(params_from_iter(params.iter()), adr_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(adrs)
    }

    pub fn update_adr(&self, id: &str, input: UpdateAdrInput) -> Result<Adr> {
        self.modify_adr(id, |_, adr, now| adr.apply(input, now))
    }

    pub fn accept_adr(&self, id: &str) -> Result<Adr> {
        self.modify_adr(id, |_, adr, now| {
            adr.accept(now);
            Ok(())
        })
    }

    pub fn deprecate_adr(&self, id: &str) -> Result<Adr> {
        self.modify_adr(id, |_, adr, now| {
            adr.deprecate(now);
            Ok(())
        })
    }

    /// Marks `id` as superseded by `by`. Both ADRs must exist; the check and
    /// the write share one transaction.
    pub fn supersede_adr(&self, id: &str, by: &str) -> Result<Adr> {
        self.modify_adr(id, |conn, adr, now| {
            if id != by && !exists(conn, "SELECT COUNT(*) FROM adrs WHERE id = ?", &by)? {
                return Err(Error::not_found(format!("ADR {}", by)));
            }
            adr.supersede(by, now)
        })
    }

    pub fn delete_adr(&self, id: &str) -> Result<()> {
        let deleted = self.conn().execute("DELETE FROM adrs WHERE id = ?", [id])?;
        if deleted == 0 {
            return Err(Error::not_found(format!("ADR {}", id)));
        }
        self.notify([RepositoryEvent::Deleted {
            kind: EntityKind::Adr,
            id: id.to_string(),
        }]);
        Ok(())
    }

    fn modify_adr<F>(&self, id: &str, change: F) -> Result<Adr>
    where
        F: FnOnce(&Connection, &mut Adr, chrono::DateTime<chrono::Utc>) -> Result<()>,
    {
        let adr = {
            let mut conn = self.conn();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let Some(mut adr) = load_adr(&tx, id)? else {
                return Err(Error::not_found(format!("ADR {}", id)));
            };
            change(&tx, &mut adr, now())?;
            tx.execute(
                "UPDATE adrs
                 SET title = ?1, status = ?2, context = ?3, decision = ?4, consequences = ?5,
                     alternatives = ?6, superseded_by = ?7, updated_at = ?8
                 WHERE id = ?9",
                (
                    &adr.title,
                    adr.status.as_str(),
                    &adr.context,
                    &adr.decision,
                    &adr.consequences,
                    &adr.alternatives,
                    &adr.superseded_by,
                    format_datetime(&adr.updated_at),
                    &adr.id,
                ),
            )?;
            tx.commit()?;
            adr
        };
        debug!(adr = %adr.id, status = %adr.status, "ADR updated");
        self.notify([RepositoryEvent::Updated {
            kind: EntityKind::Adr,
            id: adr.id.clone(),
        }]);
        Ok(adr)
    }
}

fn insert_adr(conn: &Connection, adr: &Adr) -> Result<()> {
    if !exists(conn, "SELECT COUNT(*) FROM tracks WHERE id = ?", &adr.track_id)? {
        return Err(Error::not_found(format!("track {}", adr.track_id)));
    }
    if let Some(by) = &adr.superseded_by {
        if !exists(conn, "SELECT COUNT(*) FROM adrs WHERE id = ?", by)? {
            return Err(Error::not_found(format!("ADR {}", by)));
        }
    }
    conn.execute(
        "INSERT INTO adrs
             (id, track_id, title, status, context, decision, consequences, alternatives,
              superseded_by, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        (
            &adr.id,
            &adr.track_id,
            &adr.title,
            adr.status.as_str(),
            &adr.context,
            &adr.decision,
            &adr.consequences,
            &adr.alternatives,
            &adr.superseded_by,
            format_datetime(&adr.created_at),
            format_datetime(&adr.updated_at),
        ),
    )
    .map_err(|e| map_insert_error(e, || format!("ADR {}", adr.id)))?;
    debug!(adr = %adr.id, track = %adr.track_id, "ADR saved");
    Ok(())
}

fn load_adr(conn: &Connection, id: &str) -> Result<Option<Adr>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM adrs WHERE id = ?", COLUMNS))?;
    let mut rows = stmt.query([id])?;
    match rows.next()? {
        Some(row) => Ok(Some(adr_from_row(row)?)),
        None => Ok(None),
    }
}

fn adr_from_row(row: &Row<'_>) -> rusqlite::Result<Adr> {
    Ok(Adr {
        id: row.get(0)?,
        track_id: row.get(1)?,
        title: row.get(2)?,
        status: parse_enum(3, &row.get::<_, String>(3)?)?,
        context: row.get(4)?,
        decision: row.get(5)?,
        consequences: row.get(6)?,
        alternatives: row.get(7)?,
        superseded_by: row.get(8)?,
        created_at: parse_datetime(9, &row.get::<_, String>(9)?)?,
        updated_at: parse_datetime(10, &row.get::<_, String>(10)?)?,
    })
}
