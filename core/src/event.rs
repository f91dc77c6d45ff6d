//! Notification-worthy transitions.
//!
//! RULE: one event per genuine state transition. Re-saving a record
//! without changing its state never produces an event.

use crate::types::{AgentStatus, CallId, LeadId, LeadStatus, Role, Timestamp, UserId};
use serde::{Deserialize, Serialize};

/// Variants are added as features land; never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrmEvent {
    // ── Team directory ─────────────────────────────
    UserCreated {
        user_id: UserId,
        role: Role,
    },
    SupervisorAssigned {
        telecaller_id: UserId,
        supervisor_id: UserId,
        previous_supervisor: Option<UserId>,
    },
    TeamSevered {
        owner_id: UserId,
        former_members: Vec<UserId>,
    },
    RoleChanged {
        user_id: UserId,
        from: Role,
        to: Role,
    },
    AvailabilityChanged {
        user_id: UserId,
        is_available: bool,
        status: AgentStatus,
    },
    UserDeactivated {
        user_id: UserId,
        reason: String,
    },
    UserReactivated {
        user_id: UserId,
    },
    UserDeleted {
        user_id: UserId,
        reason: String,
    },

    // ── Assignment ─────────────────────────────────
    LeadAssigned {
        lead_id: LeadId,
        telecaller_id: UserId,
        auto_assigned: bool,
    },
    LeadLeftUnassigned {
        lead_id: LeadId,
    },
    LeadReassigned {
        lead_id: LeadId,
        from: UserId,
        to: UserId,
        reason: String,
    },
    CascadeStranded {
        user_id: UserId,
        lead_ids: Vec<LeadId>,
    },

    // ── Calls ──────────────────────────────────────
    CallLogged {
        call_id: CallId,
        lead_id: LeadId,
        telecaller_id: UserId,
    },
    CallCompleted {
        call_id: CallId,
        lead_id: LeadId,
        telecaller_id: UserId,
        successful: bool,
        lead_status_after: Option<LeadStatus>,
        contacted_at: Timestamp,
    },
    CallReviewed {
        call_id: CallId,
        reviewed_by: UserId,
        rating: u8,
    },
}

impl CrmEvent {
    /// Stable name for the event_type column in event_log.
    pub fn event_type(&self) -> &'static str {
        match self {
            CrmEvent::UserCreated { .. }         => "user_created",
            CrmEvent::SupervisorAssigned { .. }  => "supervisor_assigned",
            CrmEvent::TeamSevered { .. }         => "team_severed",
            CrmEvent::RoleChanged { .. }         => "role_changed",
            CrmEvent::AvailabilityChanged { .. } => "availability_changed",
            CrmEvent::UserDeactivated { .. }     => "user_deactivated",
            CrmEvent::UserReactivated { .. }     => "user_reactivated",
            CrmEvent::UserDeleted { .. }         => "user_deleted",
            CrmEvent::LeadAssigned { .. }        => "lead_assigned",
            CrmEvent::LeadLeftUnassigned { .. }  => "lead_left_unassigned",
            CrmEvent::LeadReassigned { .. }      => "lead_reassigned",
            CrmEvent::CascadeStranded { .. }     => "cascade_stranded",
            CrmEvent::CallLogged { .. }          => "call_logged",
            CrmEvent::CallCompleted { .. }       => "call_completed",
            CrmEvent::CallReviewed { .. }        => "call_reviewed",
        }
    }

    /// Component that produced the event.
    pub fn component(&self) -> &'static str {
        match self {
            CrmEvent::LeadAssigned { .. }
            | CrmEvent::LeadLeftUnassigned { .. }
            | CrmEvent::LeadReassigned { .. }
            | CrmEvent::CascadeStranded { .. } => "assignment",
            CrmEvent::CallLogged { .. }
            | CrmEvent::CallCompleted { .. }
            | CrmEvent::CallReviewed { .. } => "calls",
            _ => "team_directory",
        }
    }
}

/// A persisted row of the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub occurred_at: Timestamp,
    pub component: String,
    pub event_type: String,
    pub payload: String,
}
