//! Line-delimited JSON commands.
//!
//! Request:  `{"as": "<user id>", "cmd": "assign_lead", "lead_id": "...", ...}`
//! Response: `{"ok": <value>, "status": 200}` or `{"error": "...", "status": <code>}`

use serde::Deserialize;
use serde_json::{json, Value};
use telecrm_core::{
    assignment_engine::{LeadAssignment, NewLead},
    authorization_gate::{require_role, Identity},
    call_outcome_processor::{CallUpdate, NewCall},
    engine::CrmEngine,
    error::{CrmError, CrmResult},
    team_directory::NewUser,
    types::{AgentStatus, Role},
};

#[derive(Debug, Deserialize)]
pub struct Request {
    /// Acting user; resolved to an `Identity` for every command.
    #[serde(rename = "as", default)]
    pub acting: Option<String>,
    #[serde(flatten)]
    pub command: AdminCommand,
}

impl Request {
    pub fn is_quit(&self) -> bool {
        matches!(self.command, AdminCommand::Quit)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AdminCommand {
    BootstrapAdmin { user: NewUser },
    CreateUser { user: NewUser },
    AssignSupervisor { telecaller_id: String, supervisor_id: String },
    ChangeRole { user_id: String, role: Role },
    SetAvailability { user_id: String, is_available: bool, status: AgentStatus },
    DeactivateUser { user_id: String, reason: String },
    ReactivateUser { user_id: String },
    DeleteUser { user_id: String, reason: String },
    Team { owner_id: String },
    Statistics { user_id: String },
    IngestLead {
        lead: NewLead,
        #[serde(default = "auto")]
        assignment: LeadAssignment,
    },
    AssignLead { lead_id: String, telecaller_id: String },
    AutoAssignLead { lead_id: String },
    SweepUnassigned,
    LogCall { call: NewCall },
    UpdateCall { call_id: String, update: CallUpdate },
    ReviewCall {
        call_id: String,
        rating: u8,
        #[serde(default)]
        comment: Option<String>,
    },
    Audit,
    Quit,
}

fn auto() -> LeadAssignment {
    LeadAssignment::Auto
}

/// Execute one request and render the reply.
pub fn respond(engine: &CrmEngine, request: Request) -> Value {
    match execute(engine, request) {
        Ok(value) => json!({ "ok": value, "status": 200 }),
        Err(e) => {
            log::debug!("command failed: {e}");
            json!({ "error": e.to_string(), "status": e.http_status() })
        }
    }
}

fn resolve(engine: &CrmEngine, acting: Option<&str>) -> CrmResult<Option<Identity>> {
    match acting {
        None => Ok(None),
        Some(id) => match engine.identity(id) {
            Ok(identity) => Ok(Some(identity)),
            Err(CrmError::NotFound { .. }) => {
                Err(CrmError::Authentication(format!("unknown user '{id}'")))
            }
            Err(e) => Err(e),
        },
    }
}

fn execute(engine: &CrmEngine, request: Request) -> CrmResult<Value> {
    let identity = resolve(engine, request.acting.as_deref())?;
    let who = identity.as_ref();

    let value = match request.command {
        AdminCommand::BootstrapAdmin { user } => serde_json::to_value(engine.bootstrap_admin(user)?)?,
        AdminCommand::CreateUser { user } => serde_json::to_value(engine.create_user(who, user)?)?,
        AdminCommand::AssignSupervisor { telecaller_id, supervisor_id } => {
            engine.assign_supervisor(who, &telecaller_id, &supervisor_id)?;
            Value::Null
        }
        AdminCommand::ChangeRole { user_id, role } => {
            engine.change_role(who, &user_id, role)?;
            Value::Null
        }
        AdminCommand::SetAvailability { user_id, is_available, status } => {
            engine.set_availability(who, &user_id, is_available, status)?;
            Value::Null
        }
        AdminCommand::DeactivateUser { user_id, reason } => {
            serde_json::to_value(engine.deactivate_user(who, &user_id, &reason)?)?
        }
        AdminCommand::ReactivateUser { user_id } => {
            engine.reactivate_user(who, &user_id)?;
            Value::Null
        }
        AdminCommand::DeleteUser { user_id, reason } => {
            serde_json::to_value(engine.delete_user(who, &user_id, &reason)?)?
        }
        AdminCommand::Team { owner_id } => serde_json::to_value(engine.team_of(who, &owner_id)?)?,
        AdminCommand::Statistics { user_id } => {
            serde_json::to_value(engine.user_statistics(who, &user_id)?)?
        }
        AdminCommand::IngestLead { lead, assignment } => {
            // Ingestion stands in for an outside source; it still needs a caller.
            require_manager(who)?;
            serde_json::to_value(engine.ingest_lead(lead, assignment)?)?
        }
        AdminCommand::AssignLead { lead_id, telecaller_id } => {
            engine.assign_lead(who, &lead_id, &telecaller_id)?;
            Value::Null
        }
        AdminCommand::AutoAssignLead { lead_id } => json!({
            "telecaller_id": engine.auto_assign_lead(who, &lead_id)?,
        }),
        AdminCommand::SweepUnassigned => {
            require_manager(who)?;
            serde_json::to_value(engine.sweep_unassigned_leads()?)?
        }
        AdminCommand::LogCall { call } => serde_json::to_value(engine.log_call(who, call)?)?,
        AdminCommand::UpdateCall { call_id, update } => {
            serde_json::to_value(engine.update_call(who, &call_id, update)?)?
        }
        AdminCommand::ReviewCall { call_id, rating, comment } => {
            engine.review_call(who, &call_id, rating, comment.as_deref())?;
            Value::Null
        }
        AdminCommand::Audit => serde_json::to_value(engine.audit_teams()?)?,
        AdminCommand::Quit => Value::Null,
    };
    Ok(value)
}

/// Operations the library leaves ungated are restricted to managers here.
fn require_manager(identity: Option<&Identity>) -> CrmResult<()> {
    require_role(identity, &[Role::Admin, Role::Supervisor])?;
    Ok(())
}
