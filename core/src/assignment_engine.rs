//! Assignment engine: who owns a lead.
//!
//! Three ways ownership changes:
//!   auto_assign               least-loaded eligible telecaller, marks the lead auto-assigned
//!   manual_assign             any telecaller the caller names, no eligibility filter
//!   reassign_on_agent_removal round-robin over a load-sorted pool, audited
//!
//! Only the removal cascade counts as an involuntary move: it alone bumps
//! `reassignment_count` and writes an audit note.

use crate::{
    config::AssignmentConfig,
    error::{CrmError, CrmResult},
    event::CrmEvent,
    store::CrmStore,
    team_directory::UserRecord,
    types::{LeadId, LeadPriority, LeadStatus, Role, Timestamp, UserId},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRecord {
    pub lead_id: LeadId,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub source: String,
    pub assigned_to: Option<UserId>,
    pub status: LeadStatus,
    pub priority: LeadPriority,
    pub auto_assigned: bool,
    pub reassignment_count: i64,
    /// Append-only audit text, one entry per line.
    pub notes: String,
    pub last_contact_date: Option<Timestamp>,
    pub followup_count: i64,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLead {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_priority")]
    pub priority: LeadPriority,
}

fn default_source() -> String {
    "manual".to_string()
}

fn default_priority() -> LeadPriority {
    LeadPriority::Medium
}

impl NewLead {
    pub fn new(name: &str, phone: &str) -> Self {
        Self {
            name: name.to_string(),
            phone: phone.to_string(),
            email: None,
            source: default_source(),
            priority: default_priority(),
        }
    }

    pub fn from_source(mut self, source: &str) -> Self {
        self.source = source.to_string();
        self
    }
}

/// How a freshly ingested lead gets its first owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "telecaller_id", rename_all = "snake_case")]
pub enum LeadAssignment {
    Unassigned,
    Auto,
    Manual(UserId),
}

/// Result of an assignment attempt. `telecaller_id` is `None` when nobody
/// was eligible, which is a normal outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub telecaller_id: Option<UserId>,
    pub events: Vec<CrmEvent>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CascadeReport {
    /// (lead, new owner) in distribution order.
    pub moved: Vec<(LeadId, UserId)>,
    /// Open leads left with the removed agent.
    pub stranded: Vec<LeadId>,
    pub events: Vec<CrmEvent>,
}

pub struct AssignmentEngine<'a> {
    store: &'a CrmStore,
    config: &'a AssignmentConfig,
}

impl<'a> AssignmentEngine<'a> {
    pub fn new(store: &'a CrmStore, config: &'a AssignmentConfig) -> Self {
        Self { store, config }
    }

    pub fn create_lead(&self, new: &NewLead, now: Timestamp) -> CrmResult<LeadRecord> {
        if new.name.trim().is_empty() {
            return Err(CrmError::Validation("lead name must not be empty".into()));
        }
        if new.phone.trim().is_empty() {
            return Err(CrmError::Validation("lead phone must not be empty".into()));
        }
        let lead = LeadRecord {
            lead_id: format!("lead-{}", Uuid::new_v4().simple()),
            name: new.name.trim().to_string(),
            phone: new.phone.trim().to_string(),
            email: new.email.clone(),
            source: new.source.clone(),
            assigned_to: None,
            status: LeadStatus::New,
            priority: new.priority,
            auto_assigned: false,
            reassignment_count: 0,
            notes: String::new(),
            last_contact_date: None,
            followup_count: 0,
            created_at: now,
        };
        self.store.insert_lead(&lead)?;
        Ok(lead)
    }

    /// Pick the telecaller a new lead should go to, without assigning.
    ///
    /// Primary pool: active, available, in an eligible status; fewest leads,
    /// then idle longest. Fallback: any active telecaller by fewest leads.
    pub fn select_telecaller(&self) -> CrmResult<Option<UserRecord>> {
        let primary = self.store.primary_pool(&self.config.eligible_statuses)?;
        if let Some(first) = primary.into_iter().next() {
            log::debug!("primary pool picked {} (load {})", first.user_id, first.total_leads);
            return Ok(Some(first));
        }
        let fallback = self.store.fallback_pool()?;
        match fallback.into_iter().next() {
            Some(first) => {
                log::debug!(
                    "primary pool empty, fallback picked {} (load {})",
                    first.user_id,
                    first.total_leads
                );
                Ok(Some(first))
            }
            None => Ok(None),
        }
    }

    pub fn auto_assign(&self, lead_id: &str) -> CrmResult<Assignment> {
        self.store.with_transaction(|store| {
            let lead = store.get_lead(lead_id)?;
            let engine = AssignmentEngine::new(store, self.config);
            let Some(chosen) = engine.select_telecaller()? else {
                log::warn!("no eligible telecaller for lead {lead_id}; left as is");
                return Ok(Assignment {
                    telecaller_id: None,
                    events: vec![CrmEvent::LeadLeftUnassigned {
                        lead_id: lead_id.to_string(),
                    }],
                });
            };
            if lead.assigned_to.is_some() {
                log::debug!("auto-assigning lead {lead_id} that already had an owner");
            }
            store.assign_lead(lead_id, &chosen.user_id, true)?;
            store.increment_total_leads(&chosen.user_id, 1)?;
            log::info!("lead {lead_id} auto-assigned to {}", chosen.user_id);
            Ok(Assignment {
                telecaller_id: Some(chosen.user_id.clone()),
                events: vec![CrmEvent::LeadAssigned {
                    lead_id: lead_id.to_string(),
                    telecaller_id: chosen.user_id,
                    auto_assigned: true,
                }],
            })
        })
    }

    /// Assign to a named telecaller. Who may do this is the caller's concern.
    pub fn manual_assign(&self, lead_id: &str, telecaller_id: &str) -> CrmResult<Vec<CrmEvent>> {
        self.store.with_transaction(|store| {
            store.get_lead(lead_id)?;
            let telecaller = store.get_user(telecaller_id)?;
            if telecaller.role != Role::Telecaller {
                return Err(CrmError::Validation(format!(
                    "'{telecaller_id}' is a {}, leads go to telecallers",
                    telecaller.role
                )));
            }
            store.assign_lead(lead_id, telecaller_id, false)?;
            store.increment_total_leads(telecaller_id, 1)?;
            log::info!("lead {lead_id} manually assigned to {telecaller_id}");
            Ok(vec![CrmEvent::LeadAssigned {
                lead_id: lead_id.to_string(),
                telecaller_id: telecaller_id.to_string(),
                auto_assigned: false,
            }])
        })
    }

    /// Spread the open leads of a departing agent over the remaining active
    /// telecallers.
    ///
    /// The pool is sorted by load once, up front; lead `i` goes to
    /// `pool[i % len]`. All moves happen in one transaction: a store failure
    /// rolls every move back and is returned. The agent's `total_leads` is
    /// zeroed in every case.
    pub fn reassign_on_agent_removal(
        &self,
        user_id: &str,
        reason: &str,
        now: Timestamp,
    ) -> CrmResult<CascadeReport> {
        self.store.get_user(user_id)?;
        let leads = self
            .store
            .open_leads_for(user_id, &self.config.terminal_lead_statuses)?;
        let pool = self.store.redistribution_pool(user_id)?;

        let distributed = if leads.is_empty() {
            Ok(CascadeReport::default())
        } else if pool.is_empty() {
            log::warn!(
                "no active telecaller to take {} open lead(s) from {user_id}; they stay put",
                leads.len()
            );
            let stranded: Vec<LeadId> = leads.iter().map(|l| l.lead_id.clone()).collect();
            Ok(CascadeReport {
                moved: Vec::new(),
                events: vec![CrmEvent::CascadeStranded {
                    user_id: user_id.to_string(),
                    lead_ids: stranded.clone(),
                }],
                stranded,
            })
        } else {
            self.distribute(user_id, &leads, &pool, reason, now)
        };

        self.store.reset_total_leads(user_id)?;
        distributed
    }

    fn distribute(
        &self,
        user_id: &str,
        leads: &[LeadRecord],
        pool: &[UserRecord],
        reason: &str,
        now: Timestamp,
    ) -> CrmResult<CascadeReport> {
        let audit_line = format!(
            "[{}] Reassigned from {user_id}: {reason}",
            now.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let report = self.store.with_transaction(|store| {
            let mut report = CascadeReport::default();
            for (i, lead) in leads.iter().enumerate() {
                let target = &pool[i % pool.len()];
                store.reassign_lead(&lead.lead_id, &target.user_id, &audit_line)?;
                store.increment_total_leads(&target.user_id, 1)?;
                report.moved.push((lead.lead_id.clone(), target.user_id.clone()));
                report.events.push(CrmEvent::LeadReassigned {
                    lead_id: lead.lead_id.clone(),
                    from: user_id.to_string(),
                    to: target.user_id.clone(),
                    reason: reason.to_string(),
                });
            }
            Ok(report)
        })?;
        log::info!(
            "redistributed {} lead(s) from {user_id} over {} telecaller(s)",
            report.moved.len(),
            pool.len()
        );
        Ok(report)
    }
}
