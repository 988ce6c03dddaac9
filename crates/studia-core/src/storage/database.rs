//! SQLite storage for practice outcomes and progress.
//!
//! Provides persistent storage for:
//! - Session outcomes and their block outcomes
//! - Backpack progress per student and exercise
//! - Key-value store for application state
//!
//! Full records are kept as JSON in a `payload` column; the other columns
//! exist for querying.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{data_dir, migrations};
use crate::error::{DatabaseError, Result};
use crate::outcome::{BlockOutcome, OutcomeId, SessionOutcome};
use crate::progress::{BackpackItem, BackpackStatus};

pub struct Database {
    conn: Connection,
}

fn json_err(e: serde_json::Error) -> DatabaseError {
    DatabaseError::QueryFailed(format!("invalid stored JSON: {e}"))
}

fn parse_time(s: &str) -> std::result::Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::QueryFailed(format!("invalid timestamp '{s}': {e}")))
}

fn parse_date(s: &str) -> std::result::Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| DatabaseError::QueryFailed(format!("invalid date '{s}': {e}")))
}

impl Database {
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open the database at `<data_dir>/studia.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    pub fn open() -> Result<Self> {
        let path = data_dir()?.join("studia.db");
        Ok(Self::open_at(&path)?)
    }

    pub fn open_at(path: &Path) -> std::result::Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: PathBuf::from(path),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database (tests and dry runs).
    pub fn open_memory() -> std::result::Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory().map_err(|source| DatabaseError::OpenFailed {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> std::result::Result<Self, DatabaseError> {
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self { conn })
    }

    // ── Outcomes ─────────────────────────────────────────────────────

    pub fn insert_session_outcome(
        &self,
        id: &OutcomeId,
        outcome: &SessionOutcome,
    ) -> std::result::Result<(), DatabaseError> {
        let payload = serde_json::to_string(outcome).map_err(json_err)?;
        self.conn.execute(
            "INSERT INTO session_outcomes (id, student_id, assignment_id, session_name,
                completed_items, omitted_items, total_elapsed_secs, end_reason, finished_at, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id.0,
                outcome.student_id,
                outcome.assignment_id,
                outcome.session_name,
                outcome.completed_items as i64,
                outcome.omitted_items as i64,
                outcome.total_elapsed_secs as i64,
                outcome.end_reason.as_str(),
                outcome.finished_at.to_rfc3339(),
                payload,
            ],
        )?;
        Ok(())
    }

    pub fn session_outcome_exists(&self, id: &OutcomeId) -> std::result::Result<bool, DatabaseError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM session_outcomes WHERE id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn session_outcome(
        &self,
        id: &OutcomeId,
    ) -> std::result::Result<Option<SessionOutcome>, DatabaseError> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM session_outcomes WHERE id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(json_err))
            .transpose()
    }

    /// Insert a block outcome. Writing the same position twice replaces
    /// the earlier row, so retried writes are idempotent.
    pub fn upsert_block_outcome(
        &self,
        session_id: &OutcomeId,
        outcome: &BlockOutcome,
    ) -> std::result::Result<(), DatabaseError> {
        let payload = serde_json::to_string(outcome).map_err(json_err)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO block_outcomes
                (session_outcome_id, position, code, backpack_key, outcome, elapsed_secs, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session_id.0,
                outcome.position as i64,
                outcome.code,
                outcome.backpack_key,
                outcome.outcome.as_str(),
                outcome.elapsed_secs as i64,
                payload,
            ],
        )?;
        Ok(())
    }

    pub fn block_outcomes(
        &self,
        session_id: &OutcomeId,
    ) -> std::result::Result<Vec<BlockOutcome>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT payload FROM block_outcomes
             WHERE session_outcome_id = ?1
             ORDER BY position",
        )?;
        let rows = stmt.query_map(params![session_id.0], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?).map_err(json_err)?);
        }
        Ok(out)
    }

    // ── Backpack ─────────────────────────────────────────────────────

    pub fn backpack_item(
        &self,
        student_id: &str,
        key: &str,
    ) -> std::result::Result<Option<BackpackItem>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                "SELECT status, mastery_score, last_practised_at, mastered_weeks,
                        last_mastered_week_start, updated_at
                 FROM backpack WHERE student_id = ?1 AND backpack_key = ?2",
                params![student_id, key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;
        let Some((status, score, last, weeks, last_week, updated)) = row else {
            return Ok(None);
        };
        let status = BackpackStatus::parse(&status)
            .ok_or_else(|| DatabaseError::QueryFailed(format!("unknown backpack status '{status}'")))?;
        let weeks: Vec<String> = serde_json::from_str(&weeks).map_err(json_err)?;
        Ok(Some(BackpackItem {
            student_id: student_id.to_string(),
            backpack_key: key.to_string(),
            status,
            mastery_score: score.max(0) as u32,
            last_practised_at: last.as_deref().map(parse_time).transpose()?,
            mastered_weeks: weeks
                .iter()
                .map(|w| parse_date(w))
                .collect::<std::result::Result<_, _>>()?,
            last_mastered_week_start: last_week.as_deref().map(parse_date).transpose()?,
            updated_at: parse_time(&updated)?,
        }))
    }

    pub fn upsert_backpack_item(&self, item: &BackpackItem) -> std::result::Result<(), DatabaseError> {
        let weeks: Vec<String> = item
            .mastered_weeks
            .iter()
            .map(|w| w.format("%Y-%m-%d").to_string())
            .collect();
        self.conn.execute(
            "INSERT OR REPLACE INTO backpack
                (student_id, backpack_key, status, mastery_score, last_practised_at,
                 mastered_weeks, last_mastered_week_start, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                item.student_id,
                item.backpack_key,
                item.status.as_str(),
                item.mastery_score as i64,
                item.last_practised_at.map(|t| t.to_rfc3339()),
                serde_json::to_string(&weeks).map_err(json_err)?,
                item.last_mastered_week_start
                    .map(|d| d.format("%Y-%m-%d").to_string()),
                item.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn backpack_for(&self, student_id: &str) -> std::result::Result<Vec<BackpackItem>, DatabaseError> {
        let keys: Vec<String> = {
            let mut stmt = self.conn.prepare(
                "SELECT backpack_key FROM backpack WHERE student_id = ?1 ORDER BY backpack_key",
            )?;
            let rows = stmt.query_map(params![student_id], |row| row.get::<_, String>(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(item) = self.backpack_item(student_id, &key)? {
                items.push(item);
            }
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{EndReason, OutcomeKind};
    use crate::plan::{ExerciseKind, Focus};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_760_000_000 + secs, 0).unwrap()
    }

    fn session() -> SessionOutcome {
        SessionOutcome {
            student_id: "stu".into(),
            assignment_id: "asg".into(),
            week_index: 1,
            session_index: 2,
            week_name: "W2".into(),
            session_name: "Thursday".into(),
            focus: Focus::Cognitive,
            total_items: 2,
            completed_items: 1,
            omitted_items: 1,
            total_elapsed_secs: 95,
            planned_duration_secs: 300,
            rating: Some(2),
            note: Some("tired".into()),
            media_links: vec!["https://rec/1".into()],
            started_at: at(0),
            finished_at: at(200),
            ended_early: false,
            end_reason: EndReason::Completed,
        }
    }

    fn block(position: usize, outcome: OutcomeKind) -> BlockOutcome {
        BlockOutcome {
            position,
            code: "TC".into(),
            name: "Scales".into(),
            kind: ExerciseKind::CoreTechnique,
            round_id: None,
            repetition: None,
            variation_key: Some("v1".into()),
            backpack_key: "scales".into(),
            outcome,
            elapsed_secs: 95,
            target_secs: 120,
            target_bpm: Some(80),
            measured_bpm: Some(76),
            started_at: at(0),
            finished_at: at(95),
        }
    }

    #[test]
    fn record_and_query_outcomes() {
        let db = Database::open_memory().unwrap();
        let id = OutcomeId("s-1".into());
        db.insert_session_outcome(&id, &session()).unwrap();
        db.upsert_block_outcome(&id, &block(1, OutcomeKind::Omitted)).unwrap();
        db.upsert_block_outcome(&id, &block(0, OutcomeKind::Completed)).unwrap();

        assert!(db.session_outcome_exists(&id).unwrap());
        assert_eq!(db.session_outcome(&id).unwrap(), Some(session()));
        let blocks = db.block_outcomes(&id).unwrap();
        assert_eq!(blocks.iter().map(|b| b.position).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn block_upsert_replaces_same_position() {
        let db = Database::open_memory().unwrap();
        let id = OutcomeId("s-1".into());
        db.insert_session_outcome(&id, &session()).unwrap();
        db.upsert_block_outcome(&id, &block(0, OutcomeKind::Completed)).unwrap();
        db.upsert_block_outcome(&id, &block(0, OutcomeKind::Omitted)).unwrap();
        let blocks = db.block_outcomes(&id).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].outcome, OutcomeKind::Omitted);
    }

    #[test]
    fn backpack_round_trips() {
        let db = Database::open_memory().unwrap();
        let item = BackpackItem {
            student_id: "stu".into(),
            backpack_key: "scales".into(),
            status: BackpackStatus::InProgress,
            mastery_score: 25,
            last_practised_at: Some(at(10)),
            mastered_weeks: vec![NaiveDate::from_ymd_opt(2026, 10, 5).unwrap()],
            last_mastered_week_start: NaiveDate::from_ymd_opt(2026, 10, 5),
            updated_at: at(20),
        };
        db.upsert_backpack_item(&item).unwrap();
        assert_eq!(db.backpack_item("stu", "scales").unwrap(), Some(item.clone()));
        assert!(db.backpack_item("stu", "other").unwrap().is_none());
        assert_eq!(db.backpack_for("stu").unwrap(), vec![item]);
    }

    #[test]
    fn open_at_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("studia.db");
        Database::open_at(&path).unwrap();
        assert!(path.exists());
    }
}
