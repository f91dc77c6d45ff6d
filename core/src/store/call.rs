use super::{user::expect_one, CrmStore};
use crate::{
    call_outcome_processor::CallRecord,
    error::{CrmError, CrmResult},
    types::{from_millis, to_millis, CallStatus, LeadStatus},
};
use rusqlite::{params, OptionalExtension};

const CALL_COLUMNS: &str = "call_id, telecaller_id, lead_id, status, outcome, is_successful,
    lead_status_before, lead_status_after, start_time, end_time, duration_secs, notes,
    reviewed_by, review_rating, review_comment, created_at";

fn call_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<CallRecord> {
    Ok(CallRecord {
        call_id: row.get(0)?,
        telecaller_id: row.get(1)?,
        lead_id: row.get(2)?,
        status: row.get(3)?,
        outcome: row.get(4)?,
        is_successful: row.get::<_, i32>(5)? != 0,
        lead_status_before: row.get(6)?,
        lead_status_after: row.get(7)?,
        start_time: row.get::<_, Option<i64>>(8)?.map(from_millis),
        end_time: row.get::<_, Option<i64>>(9)?.map(from_millis),
        duration_secs: row.get(10)?,
        notes: row.get(11)?,
        reviewed_by: row.get(12)?,
        review_rating: row.get(13)?,
        review_comment: row.get(14)?,
        created_at: from_millis(row.get(15)?),
    })
}

impl CrmStore {
    // ── Call ───────────────────────────────────────────────────

    pub fn insert_call(&self, c: &CallRecord) -> CrmResult<()> {
        self.conn.execute(
            "INSERT INTO call (
                call_id, telecaller_id, lead_id, status, outcome, is_successful,
                lead_status_before, lead_status_after, start_time, end_time, duration_secs,
                notes, reviewed_by, review_rating, review_comment, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                &c.call_id,
                &c.telecaller_id,
                &c.lead_id,
                c.status,
                c.outcome,
                c.is_successful as i32,
                c.lead_status_before,
                c.lead_status_after,
                c.start_time.map(to_millis),
                c.end_time.map(to_millis),
                c.duration_secs,
                c.notes.as_deref(),
                c.reviewed_by.as_deref(),
                c.review_rating,
                c.review_comment.as_deref(),
                to_millis(c.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_call(&self, call_id: &str) -> CrmResult<CallRecord> {
        self.conn
            .query_row(
                &format!("SELECT {CALL_COLUMNS} FROM call WHERE call_id = ?1"),
                params![call_id],
                call_row_mapper,
            )
            .optional()?
            .ok_or_else(|| CrmError::not_found("call", call_id))
    }

    pub fn calls_for_lead(&self, lead_id: &str) -> CrmResult<Vec<CallRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CALL_COLUMNS} FROM call WHERE lead_id = ?1 ORDER BY created_at ASC, rowid ASC"
        ))?;
        let calls = stmt
            .query_map(params![lead_id], call_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(calls)
    }

    /// Save the mutable details of a call. Status, `lead_status_before` and
    /// `lead_status_after` have their own guarded writers.
    pub fn save_call_details(&self, c: &CallRecord) -> CrmResult<()> {
        let n = self.conn.execute(
            "UPDATE call SET outcome = ?1, is_successful = ?2, start_time = ?3, end_time = ?4,
                             duration_secs = ?5, notes = ?6
             WHERE call_id = ?7",
            params![
                c.outcome,
                c.is_successful as i32,
                c.start_time.map(to_millis),
                c.end_time.map(to_millis),
                c.duration_secs,
                c.notes.as_deref(),
                &c.call_id,
            ],
        )?;
        expect_one(n, "call", &c.call_id)
    }

    /// Compare-and-set on the call status. Returns false when the stored
    /// status was no longer `from`.
    pub fn transition_call_status(
        &self,
        call_id: &str,
        from: CallStatus,
        to: CallStatus,
    ) -> CrmResult<bool> {
        let n = self.conn.execute(
            "UPDATE call SET status = ?1 WHERE call_id = ?2 AND status = ?3",
            params![to, call_id, from],
        )?;
        Ok(n == 1)
    }

    /// Write-once: an already recorded post-call status is kept.
    pub fn set_lead_status_after(&self, call_id: &str, status: LeadStatus) -> CrmResult<()> {
        let n = self.conn.execute(
            "UPDATE call SET lead_status_after = COALESCE(lead_status_after, ?1)
             WHERE call_id = ?2",
            params![status, call_id],
        )?;
        expect_one(n, "call", call_id)
    }

    pub fn save_review(
        &self,
        call_id: &str,
        reviewer_id: &str,
        rating: u8,
        comment: Option<&str>,
    ) -> CrmResult<()> {
        let n = self.conn.execute(
            "UPDATE call SET reviewed_by = ?1, review_rating = ?2, review_comment = ?3
             WHERE call_id = ?4",
            params![reviewer_id, rating, comment, call_id],
        )?;
        expect_one(n, "call", call_id)
    }
}
