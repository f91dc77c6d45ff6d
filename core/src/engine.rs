//! The CRM engine: the one entry point transports talk to.
//!
//! EVERY OPERATION:
//!   1. checks the caller's explicit `Identity` through the authorization gate,
//!   2. runs one component operation against the store,
//!   3. persists the resulting events to event_log,
//!   4. hands each event to the notifier exactly once.
//!
//! Components never call the notifier themselves; a save that changes no
//! state returns no events and therefore notifies nobody.

use crate::{
    assignment_engine::{AssignmentEngine, CascadeReport, LeadAssignment, LeadRecord, NewLead},
    authorization_gate::{
        authenticate, can_manage_user, require_resource_access, require_role, Identity,
    },
    call_outcome_processor::{CallOutcomeProcessor, CallSave, CallUpdate, NewCall},
    clock::CrmClock,
    config::CrmConfig,
    error::{CrmError, CrmResult},
    event::{CrmEvent, EventLogEntry},
    notifier::{LogNotifier, Notifier},
    store::CrmStore,
    team_directory::{NewUser, TeamDirectory, TeamViolation, UserRecord},
    types::{AgentStatus, LeadId, Role, UserId},
};
use serde::{Deserialize, Serialize};

const MANAGERS: &[Role] = &[Role::Admin, Role::Supervisor];

/// Per-user statistics read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStatistics {
    pub user_id: UserId,
    pub total_leads: i64,
    pub open_leads: i64,
    pub total_calls: i64,
    pub successful_calls: i64,
    /// successful / total, 0.0 when no calls were made.
    pub success_rate: f64,
}

/// What happened to a removed agent's leads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemovalReport {
    pub user_id: UserId,
    pub moved: Vec<(LeadId, UserId)>,
    pub stranded: Vec<LeadId>,
    /// Set when the redistribution failed and was rolled back.
    pub cascade_error: Option<String>,
}

pub struct CrmEngine {
    config: CrmConfig,
    clock: CrmClock,
    store: CrmStore,
    notifier: Box<dyn Notifier>,
}

impl CrmEngine {
    pub fn new(store: CrmStore, config: CrmConfig, clock: CrmClock, notifier: Box<dyn Notifier>) -> Self {
        Self { config, clock, store, notifier }
    }

    /// Engine with the default config, the wall clock and log notifications.
    pub fn build(store: CrmStore) -> Self {
        Self::new(store, CrmConfig::default(), CrmClock::System, Box::new(LogNotifier))
    }

    pub fn store(&self) -> &CrmStore {
        &self.store
    }

    pub fn clock(&self) -> &CrmClock {
        &self.clock
    }

    pub fn config(&self) -> &CrmConfig {
        &self.config
    }

    /// Resolve an identity for a user id (the session collaborator's job).
    pub fn identity(&self, user_id: &str) -> CrmResult<Identity> {
        self.store.identity(user_id)
    }

    fn team(&self) -> TeamDirectory<'_> {
        TeamDirectory::new(&self.store)
    }

    fn assignment(&self) -> AssignmentEngine<'_> {
        AssignmentEngine::new(&self.store, &self.config.assignment)
    }

    fn calls(&self) -> CallOutcomeProcessor<'_> {
        CallOutcomeProcessor::new(&self.store)
    }

    fn publish(&self, events: &[CrmEvent]) -> CrmResult<()> {
        let now = self.clock.now();
        for event in events {
            let entry = EventLogEntry {
                id: None,
                occurred_at: now,
                component: event.component().to_string(),
                event_type: event.event_type().to_string(),
                payload: serde_json::to_string(event)?,
            };
            self.store.append_event(&entry)?;
        }
        for event in events {
            self.notifier.notify(event);
        }
        Ok(())
    }

    // ── Users and teams ────────────────────────────────────────

    /// Create the first admin of an empty directory. No identity needed;
    /// refused once any admin exists.
    pub fn bootstrap_admin(&self, new: NewUser) -> CrmResult<UserRecord> {
        if new.role != Role::Admin {
            return Err(CrmError::Validation("bootstrap user must be an admin".into()));
        }
        if self.store.user_count(Role::Admin)? > 0 {
            return Err(CrmError::Validation("an admin already exists".into()));
        }
        let (user, events) = self.team().create_user(new, self.clock.now())?;
        self.publish(&events)?;
        Ok(user)
    }

    pub fn create_user(&self, identity: Option<&Identity>, new: NewUser) -> CrmResult<UserRecord> {
        require_role(identity, &[Role::Admin])?;
        let (user, events) = self.team().create_user(new, self.clock.now())?;
        self.publish(&events)?;
        Ok(user)
    }

    pub fn assign_supervisor(
        &self,
        identity: Option<&Identity>,
        telecaller_id: &str,
        supervisor_id: &str,
    ) -> CrmResult<()> {
        let identity = require_role(identity, MANAGERS)?;
        can_manage_user(&self.store, identity, telecaller_id)?;
        let events = self.team().assign_supervisor(telecaller_id, supervisor_id)?;
        self.publish(&events)
    }

    pub fn change_role(&self, identity: Option<&Identity>, user_id: &str, new_role: Role) -> CrmResult<()> {
        let events = self.team().change_role(identity, user_id, new_role)?;
        self.publish(&events)
    }

    pub fn set_availability(
        &self,
        identity: Option<&Identity>,
        user_id: &str,
        is_available: bool,
        status: AgentStatus,
    ) -> CrmResult<()> {
        let identity = authenticate(identity)?;
        require_resource_access(identity, user_id)?;
        let events = self
            .team()
            .set_availability(user_id, is_available, status, self.clock.now())?;
        self.publish(&events)
    }

    pub fn team_of(&self, identity: Option<&Identity>, owner_id: &str) -> CrmResult<Vec<UserRecord>> {
        let identity = authenticate(identity)?;
        can_manage_user(&self.store, identity, owner_id)?;
        self.team().members_of(owner_id)
    }

    pub fn user_statistics(&self, identity: Option<&Identity>, user_id: &str) -> CrmResult<UserStatistics> {
        let identity = authenticate(identity)?;
        let user = can_manage_user(&self.store, identity, user_id)?;
        let open_leads = self
            .store
            .open_lead_count_for(user_id, &self.config.assignment.terminal_lead_statuses)?;
        let success_rate = if user.total_calls > 0 {
            user.successful_calls as f64 / user.total_calls as f64
        } else {
            0.0
        };
        Ok(UserStatistics {
            user_id: user.user_id,
            total_leads: user.total_leads,
            open_leads,
            total_calls: user.total_calls,
            successful_calls: user.successful_calls,
            success_rate,
        })
    }

    pub fn audit_teams(&self) -> CrmResult<Vec<TeamViolation>> {
        self.team().audit()
    }

    /// Deactivate an agent. Team links are cut and open leads redistributed;
    /// a failed redistribution leaves the leads in place and the
    /// deactivation still completes.
    pub fn deactivate_user(
        &self,
        identity: Option<&Identity>,
        user_id: &str,
        reason: &str,
    ) -> CrmResult<RemovalReport> {
        let identity = require_role(identity, MANAGERS)?;
        let target = can_manage_user(&self.store, identity, user_id)?;
        if !target.is_active {
            return Err(CrmError::Validation(format!("user '{user_id}' is already deactivated")));
        }
        let report = self.remove_agent(user_id, reason)?;
        self.store.set_active(user_id, false)?;
        log::info!("deactivated {user_id}: {reason}");
        self.publish(&[CrmEvent::UserDeactivated {
            user_id: user_id.to_string(),
            reason: reason.to_string(),
        }])?;
        Ok(report)
    }

    pub fn reactivate_user(&self, identity: Option<&Identity>, user_id: &str) -> CrmResult<()> {
        require_role(identity, &[Role::Admin])?;
        let user = self.store.get_user(user_id)?;
        if user.is_active {
            return Ok(());
        }
        self.store.set_active(user_id, true)?;
        self.publish(&[CrmEvent::UserReactivated { user_id: user_id.to_string() }])
    }

    /// Delete a user. Leads that cannot be moved keep the removed id.
    pub fn delete_user(&self, identity: Option<&Identity>, user_id: &str, reason: &str) -> CrmResult<RemovalReport> {
        let identity = require_role(identity, &[Role::Admin])?;
        can_manage_user(&self.store, identity, user_id)?;
        if identity.id == user_id {
            return Err(CrmError::Validation("an admin cannot delete their own account".into()));
        }
        let report = self.remove_agent(user_id, reason)?;
        self.store.delete_user(user_id)?;
        log::info!("deleted {user_id}: {reason}");
        self.publish(&[CrmEvent::UserDeleted {
            user_id: user_id.to_string(),
            reason: reason.to_string(),
        }])?;
        Ok(report)
    }

    fn remove_agent(&self, user_id: &str, reason: &str) -> CrmResult<RemovalReport> {
        let team_events = self.team().remove_from_team(user_id)?;
        self.publish(&team_events)?;

        match self
            .assignment()
            .reassign_on_agent_removal(user_id, reason, self.clock.now())
        {
            Ok(CascadeReport { moved, stranded, events }) => {
                self.publish(&events)?;
                Ok(RemovalReport {
                    user_id: user_id.to_string(),
                    moved,
                    stranded,
                    cascade_error: None,
                })
            }
            Err(e) => {
                log::warn!("lead redistribution for {user_id} failed and was rolled back: {e}");
                let stranded: Vec<LeadId> = self
                    .store
                    .open_leads_for(user_id, &self.config.assignment.terminal_lead_statuses)?
                    .into_iter()
                    .map(|l| l.lead_id)
                    .collect();
                self.publish(&[CrmEvent::CascadeStranded {
                    user_id: user_id.to_string(),
                    lead_ids: stranded.clone(),
                }])?;
                Ok(RemovalReport {
                    user_id: user_id.to_string(),
                    moved: Vec::new(),
                    stranded,
                    cascade_error: Some(e.to_string()),
                })
            }
        }
    }

    // ── Leads ──────────────────────────────────────────────────

    /// Ingest a lead from an outside source. Finding nobody for `Auto` leaves
    /// the lead unassigned; it is not an error.
    pub fn ingest_lead(&self, new: NewLead, assignment: LeadAssignment) -> CrmResult<LeadRecord> {
        let now = self.clock.now();
        let (lead_id, events) = self.store.with_transaction(|store| {
            let engine = AssignmentEngine::new(store, &self.config.assignment);
            let lead = engine.create_lead(&new, now)?;
            let events = match &assignment {
                LeadAssignment::Unassigned => Vec::new(),
                LeadAssignment::Auto => engine.auto_assign(&lead.lead_id)?.events,
                LeadAssignment::Manual(telecaller_id) => {
                    engine.manual_assign(&lead.lead_id, telecaller_id)?
                }
            };
            Ok((lead.lead_id, events))
        })?;
        self.publish(&events)?;
        self.store.get_lead(&lead_id)
    }

    pub fn assign_lead(&self, identity: Option<&Identity>, lead_id: &str, telecaller_id: &str) -> CrmResult<()> {
        let identity = require_role(identity, MANAGERS)?;
        can_manage_user(&self.store, identity, telecaller_id)?;
        let events = self.assignment().manual_assign(lead_id, telecaller_id)?;
        self.publish(&events)
    }

    /// Explicit auto-assignment request; here exhaustion is reported.
    pub fn auto_assign_lead(&self, identity: Option<&Identity>, lead_id: &str) -> CrmResult<UserId> {
        require_role(identity, MANAGERS)?;
        let assignment = self.assignment().auto_assign(lead_id)?;
        self.publish(&assignment.events)?;
        assignment
            .telecaller_id
            .ok_or_else(|| CrmError::AssignmentExhausted { lead_id: lead_id.to_string() })
    }

    /// Retry auto-assignment for unassigned open leads, oldest first.
    /// Stops at the first lead nobody can take.
    pub fn sweep_unassigned_leads(&self) -> CrmResult<Vec<(LeadId, UserId)>> {
        let engine = self.assignment();
        let pending = self
            .store
            .unassigned_open_leads(&self.config.assignment.terminal_lead_statuses)?;
        let mut assigned = Vec::new();
        for lead in pending {
            let assignment = engine.auto_assign(&lead.lead_id)?;
            match assignment.telecaller_id {
                Some(telecaller_id) => {
                    self.publish(&assignment.events)?;
                    assigned.push((lead.lead_id, telecaller_id));
                }
                None => {
                    log::warn!("sweep stopped: no telecaller available for {}", lead.lead_id);
                    break;
                }
            }
        }
        Ok(assigned)
    }

    // ── Calls ──────────────────────────────────────────────────

    pub fn log_call(&self, identity: Option<&Identity>, new: NewCall) -> CrmResult<CallSave> {
        let identity = authenticate(identity)?;
        require_resource_access(identity, &new.telecaller_id)?;
        let saved = self.calls().log_call(new, self.clock.now())?;
        self.publish(&saved.events)?;
        Ok(saved)
    }

    pub fn update_call(&self, identity: Option<&Identity>, call_id: &str, update: CallUpdate) -> CrmResult<CallSave> {
        let identity = authenticate(identity)?;
        let call = self.store.get_call(call_id)?;
        require_resource_access(identity, &call.telecaller_id)?;
        let saved = self.calls().update_call(call_id, update, self.clock.now())?;
        self.publish(&saved.events)?;
        Ok(saved)
    }

    pub fn review_call(
        &self,
        identity: Option<&Identity>,
        call_id: &str,
        rating: u8,
        comment: Option<&str>,
    ) -> CrmResult<()> {
        let identity = require_role(identity, MANAGERS)?;
        let call = self.store.get_call(call_id)?;
        can_manage_user(&self.store, identity, &call.telecaller_id)?;
        let events = self
            .calls()
            .review_call(call_id, &identity.id, rating, comment, &self.config.reviews)?;
        self.publish(&events)
    }
}
