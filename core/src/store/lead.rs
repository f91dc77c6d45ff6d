use super::{placeholders, user::expect_one, CrmStore};
use crate::{
    assignment_engine::LeadRecord,
    error::{CrmError, CrmResult},
    types::{from_millis, to_millis, LeadStatus, Timestamp},
};
use rusqlite::{params, params_from_iter, types::Value, OptionalExtension};

const LEAD_COLUMNS: &str = "lead_id, name, phone, email, source, assigned_to, status, priority,
    auto_assigned, reassignment_count, notes, last_contact_date, followup_count, created_at";

fn lead_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<LeadRecord> {
    Ok(LeadRecord {
        lead_id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        email: row.get(3)?,
        source: row.get(4)?,
        assigned_to: row.get(5)?,
        status: row.get(6)?,
        priority: row.get(7)?,
        auto_assigned: row.get::<_, i32>(8)? != 0,
        reassignment_count: row.get(9)?,
        notes: row.get(10)?,
        last_contact_date: row.get::<_, Option<i64>>(11)?.map(from_millis),
        followup_count: row.get(12)?,
        created_at: from_millis(row.get(13)?),
    })
}

impl CrmStore {
    // ── Lead ───────────────────────────────────────────────────

    pub fn insert_lead(&self, l: &LeadRecord) -> CrmResult<()> {
        self.conn.execute(
            "INSERT INTO lead (
                lead_id, name, phone, email, source, assigned_to, status, priority,
                auto_assigned, reassignment_count, notes, last_contact_date, followup_count,
                created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                &l.lead_id,
                &l.name,
                &l.phone,
                l.email.as_deref(),
                &l.source,
                l.assigned_to.as_deref(),
                l.status,
                l.priority,
                l.auto_assigned as i32,
                l.reassignment_count,
                &l.notes,
                l.last_contact_date.map(to_millis),
                l.followup_count,
                to_millis(l.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_lead(&self, lead_id: &str) -> CrmResult<LeadRecord> {
        self.conn
            .query_row(
                &format!("SELECT {LEAD_COLUMNS} FROM lead WHERE lead_id = ?1"),
                params![lead_id],
                lead_row_mapper,
            )
            .optional()?
            .ok_or_else(|| CrmError::not_found("lead", lead_id))
    }

    /// Leads owned by `user_id` whose status is not in `terminal`, oldest first.
    pub fn open_leads_for(
        &self,
        user_id: &str,
        terminal: &[LeadStatus],
    ) -> CrmResult<Vec<LeadRecord>> {
        let mut sql = format!("SELECT {LEAD_COLUMNS} FROM lead WHERE assigned_to = ?1");
        if !terminal.is_empty() {
            sql.push_str(&format!(
                " AND status NOT IN ({})",
                placeholders(2, terminal.len())
            ));
        }
        sql.push_str(" ORDER BY created_at ASC, rowid ASC");

        let mut bind: Vec<Value> = vec![Value::Text(user_id.to_string())];
        bind.extend(terminal.iter().map(|s| Value::Text(s.as_str().to_string())));

        let mut stmt = self.conn.prepare(&sql)?;
        let leads = stmt
            .query_map(params_from_iter(bind), lead_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(leads)
    }

    /// Unassigned leads whose status is not in `terminal`, oldest first.
    pub fn unassigned_open_leads(&self, terminal: &[LeadStatus]) -> CrmResult<Vec<LeadRecord>> {
        let mut sql = format!("SELECT {LEAD_COLUMNS} FROM lead WHERE assigned_to IS NULL");
        if !terminal.is_empty() {
            sql.push_str(&format!(
                " AND status NOT IN ({})",
                placeholders(1, terminal.len())
            ));
        }
        sql.push_str(" ORDER BY created_at ASC, rowid ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let leads = stmt
            .query_map(params_from_iter(terminal.iter()), lead_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(leads)
    }

    pub fn leads_assigned_to(&self, user_id: &str) -> CrmResult<Vec<LeadRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LEAD_COLUMNS} FROM lead WHERE assigned_to = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))?;
        let leads = stmt
            .query_map(params![user_id], lead_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(leads)
    }

    /// Voluntary assignment: ownership and the auto flag change,
    /// `reassignment_count` does not.
    pub fn assign_lead(&self, lead_id: &str, user_id: &str, auto_assigned: bool) -> CrmResult<()> {
        let n = self.conn.execute(
            "UPDATE lead SET assigned_to = ?1, auto_assigned = ?2 WHERE lead_id = ?3",
            params![user_id, auto_assigned as i32, lead_id],
        )?;
        expect_one(n, "lead", lead_id)
    }

    /// Involuntary move: bumps `reassignment_count` and appends one audit line.
    pub fn reassign_lead(&self, lead_id: &str, user_id: &str, audit_line: &str) -> CrmResult<()> {
        let n = self.conn.execute(
            "UPDATE lead SET assigned_to = ?1,
                             reassignment_count = reassignment_count + 1,
                             notes = CASE WHEN notes = '' THEN ?2
                                          ELSE notes || char(10) || ?2 END
             WHERE lead_id = ?3",
            params![user_id, audit_line, lead_id],
        )?;
        expect_one(n, "lead", lead_id)
    }

    /// Post-call bookkeeping on the lead. `status` of `None` keeps the current stage.
    pub fn record_contact(
        &self,
        lead_id: &str,
        at: Timestamp,
        status: Option<LeadStatus>,
    ) -> CrmResult<()> {
        let n = self.conn.execute(
            "UPDATE lead SET last_contact_date = ?1,
                             followup_count = followup_count + 1,
                             status = COALESCE(?2, status)
             WHERE lead_id = ?3",
            params![to_millis(at), status, lead_id],
        )?;
        expect_one(n, "lead", lead_id)
    }

    pub fn open_lead_count_for(&self, user_id: &str, terminal: &[LeadStatus]) -> CrmResult<i64> {
        Ok(self.open_leads_for(user_id, terminal)?.len() as i64)
    }
}
