use super::{placeholders, CrmStore};
use crate::{
    authorization_gate::Identity,
    error::{CrmError, CrmResult},
    team_directory::UserRecord,
    types::{from_millis, to_millis, AgentStatus, Role, Timestamp},
};
use rusqlite::{params, params_from_iter, OptionalExtension};
use std::collections::BTreeSet;

const USER_COLUMNS: &str = "user_id, name, email, role, department, is_active, is_available,
    current_status, supervisor_id, total_leads, total_calls, successful_calls,
    last_active, created_at";

// Team membership is loaded separately; pools never need it.
fn user_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        user_id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: row.get(3)?,
        department: row.get(4)?,
        is_active: row.get::<_, i32>(5)? != 0,
        is_available: row.get::<_, i32>(6)? != 0,
        current_status: row.get(7)?,
        supervisor: row.get(8)?,
        team_members: BTreeSet::new(),
        total_leads: row.get(9)?,
        total_calls: row.get(10)?,
        successful_calls: row.get(11)?,
        last_active: row.get::<_, Option<i64>>(12)?.map(from_millis),
        created_at: from_millis(row.get(13)?),
    })
}

impl CrmStore {
    // ── User ───────────────────────────────────────────────────

    pub fn insert_user(&self, u: &UserRecord) -> CrmResult<()> {
        self.conn.execute(
            "INSERT INTO app_user (
                user_id, name, email, role, department, is_active, is_available,
                current_status, supervisor_id, total_leads, total_calls, successful_calls,
                last_active, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                &u.user_id,
                &u.name,
                &u.email,
                u.role,
                u.department.as_deref(),
                u.is_active as i32,
                u.is_available as i32,
                u.current_status,
                u.supervisor.as_deref(),
                u.total_leads,
                u.total_calls,
                u.successful_calls,
                u.last_active.map(to_millis),
                to_millis(u.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_user(&self, user_id: &str) -> CrmResult<Option<UserRecord>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM app_user WHERE user_id = ?1"),
                params![user_id],
                user_row_mapper,
            )
            .optional()?;
        match user {
            Some(mut u) => {
                u.team_members = self.team_member_ids(&u.user_id)?;
                Ok(Some(u))
            }
            None => Ok(None),
        }
    }

    pub fn get_user(&self, user_id: &str) -> CrmResult<UserRecord> {
        self.find_user(user_id)?
            .ok_or_else(|| CrmError::not_found("user", user_id))
    }

    /// Resolve the identity record the session collaborator hands to the core.
    pub fn identity(&self, user_id: &str) -> CrmResult<Identity> {
        Ok(Identity::from(&self.get_user(user_id)?))
    }

    pub fn email_taken(&self, email: &str) -> CrmResult<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM app_user WHERE email = ?1",
            params![email],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn all_users(&self) -> CrmResult<Vec<UserRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM app_user ORDER BY rowid ASC"))?;
        let mut users = stmt
            .query_map([], user_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        for u in &mut users {
            u.team_members = self.team_member_ids(&u.user_id)?;
        }
        Ok(users)
    }

    pub fn users_by_ids(&self, ids: &BTreeSet<String>) -> CrmResult<Vec<UserRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM app_user WHERE user_id IN ({}) ORDER BY rowid ASC",
            placeholders(1, ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let users = stmt
            .query_map(params_from_iter(ids.iter()), user_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn set_role(&self, user_id: &str, role: Role) -> CrmResult<()> {
        let n = self.conn.execute(
            "UPDATE app_user SET role = ?1 WHERE user_id = ?2",
            params![role, user_id],
        )?;
        expect_one(n, "user", user_id)
    }

    pub fn set_active(&self, user_id: &str, is_active: bool) -> CrmResult<()> {
        let n = self.conn.execute(
            "UPDATE app_user SET is_active = ?1 WHERE user_id = ?2",
            params![is_active as i32, user_id],
        )?;
        expect_one(n, "user", user_id)
    }

    pub fn set_availability(
        &self,
        user_id: &str,
        is_available: bool,
        status: AgentStatus,
        at: Timestamp,
    ) -> CrmResult<()> {
        let n = self.conn.execute(
            "UPDATE app_user SET is_available = ?1, current_status = ?2, last_active = ?3
             WHERE user_id = ?4",
            params![is_available as i32, status, to_millis(at), user_id],
        )?;
        expect_one(n, "user", user_id)
    }

    pub fn delete_user(&self, user_id: &str) -> CrmResult<()> {
        let n = self
            .conn
            .execute("DELETE FROM app_user WHERE user_id = ?1", params![user_id])?;
        expect_one(n, "user", user_id)
    }

    // ── Counters (atomic) ──────────────────────────────────────

    pub fn increment_total_leads(&self, user_id: &str, by: i64) -> CrmResult<()> {
        let n = self.conn.execute(
            "UPDATE app_user SET total_leads = total_leads + ?1 WHERE user_id = ?2",
            params![by, user_id],
        )?;
        expect_one(n, "user", user_id)
    }

    pub fn reset_total_leads(&self, user_id: &str) -> CrmResult<()> {
        let n = self.conn.execute(
            "UPDATE app_user SET total_leads = 0 WHERE user_id = ?1",
            params![user_id],
        )?;
        expect_one(n, "user", user_id)
    }

    /// Overwrite the load counter. Only for imports and seeding.
    pub fn set_total_leads(&self, user_id: &str, total_leads: i64) -> CrmResult<()> {
        let n = self.conn.execute(
            "UPDATE app_user SET total_leads = ?1 WHERE user_id = ?2",
            params![total_leads, user_id],
        )?;
        expect_one(n, "user", user_id)
    }

    pub fn record_call_stats(&self, user_id: &str, successful: bool) -> CrmResult<()> {
        let n = self.conn.execute(
            "UPDATE app_user SET total_calls = total_calls + 1,
                                 successful_calls = successful_calls + ?1
             WHERE user_id = ?2",
            params![successful as i64, user_id],
        )?;
        expect_one(n, "user", user_id)
    }

    // ── Eligibility pools ──────────────────────────────────────
    //
    // Ties beyond the documented sort keys fall back to creation order.

    /// Active, available telecallers in one of `statuses`; fewest leads
    /// first, then longest idle (never-active agents sort first).
    pub fn primary_pool(&self, statuses: &[AgentStatus]) -> CrmResult<Vec<UserRecord>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM app_user
             WHERE role = 'telecaller' AND is_active = 1 AND is_available = 1
               AND current_status IN ({})
             ORDER BY total_leads ASC, last_active ASC, rowid ASC",
            placeholders(1, statuses.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let pool = stmt
            .query_map(params_from_iter(statuses.iter()), user_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pool)
    }

    /// Every active telecaller, availability ignored; fewest leads first.
    pub fn fallback_pool(&self) -> CrmResult<Vec<UserRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM app_user
             WHERE role = 'telecaller' AND is_active = 1
             ORDER BY total_leads ASC, rowid ASC"
        ))?;
        let pool = stmt
            .query_map([], user_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pool)
    }

    /// Active telecallers other than `excluded`; fewest leads first.
    pub fn redistribution_pool(&self, excluded: &str) -> CrmResult<Vec<UserRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM app_user
             WHERE role = 'telecaller' AND is_active = 1 AND user_id != ?1
             ORDER BY total_leads ASC, rowid ASC"
        ))?;
        let pool = stmt
            .query_map(params![excluded], user_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pool)
    }

    // ── Team membership ────────────────────────────────────────
    //
    // `team_member` rows and `app_user.supervisor_id` are two halves of one
    // relationship. Only TeamDirectory calls the methods below.

    pub fn team_member_ids(&self, owner_id: &str) -> CrmResult<BTreeSet<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT member_id FROM team_member WHERE owner_id = ?1 ORDER BY member_id ASC",
        )?;
        let ids = stmt
            .query_map(params![owner_id], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(ids)
    }

    pub fn add_team_member(&self, owner_id: &str, member_id: &str) -> CrmResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO team_member (owner_id, member_id) VALUES (?1, ?2)",
            params![owner_id, member_id],
        )?;
        Ok(())
    }

    /// Remove `member_id` from every team that lists it. Returns rows removed.
    pub fn remove_member_everywhere(&self, member_id: &str) -> CrmResult<usize> {
        let n = self.conn.execute(
            "DELETE FROM team_member WHERE member_id = ?1",
            params![member_id],
        )?;
        Ok(n)
    }

    pub fn clear_team_members(&self, owner_id: &str) -> CrmResult<usize> {
        let n = self.conn.execute(
            "DELETE FROM team_member WHERE owner_id = ?1",
            params![owner_id],
        )?;
        Ok(n)
    }

    pub fn set_supervisor(&self, user_id: &str, supervisor_id: Option<&str>) -> CrmResult<()> {
        let n = self.conn.execute(
            "UPDATE app_user SET supervisor_id = ?1 WHERE user_id = ?2",
            params![supervisor_id, user_id],
        )?;
        expect_one(n, "user", user_id)
    }

    /// Unset `supervisor_id` on every user that points at `owner_id`.
    /// Returns the ids that were severed.
    pub fn sever_members_of(&self, owner_id: &str) -> CrmResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id FROM app_user WHERE supervisor_id = ?1 ORDER BY rowid ASC",
        )?;
        let pointing = stmt
            .query_map(params![owner_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        self.conn.execute(
            "UPDATE app_user SET supervisor_id = NULL WHERE supervisor_id = ?1",
            params![owner_id],
        )?;
        Ok(pointing)
    }

    /// Count users by role.
    pub fn user_count(&self, role: Role) -> CrmResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM app_user WHERE role = ?1",
            params![role],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

pub(super) fn expect_one(changed: usize, entity: &'static str, id: &str) -> CrmResult<()> {
    if changed == 0 {
        return Err(CrmError::not_found(entity, id));
    }
    Ok(())
}
