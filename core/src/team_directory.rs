//! Team directory: users and the supervisor/team relationship.
//!
//! The relationship has two halves: each telecaller's `supervisor`
//! back-reference and each owner's `team_members` set. They are separate
//! records in the store and change together, inside one transaction, only
//! through the methods here.
//!
//! INVARIANTS:
//!   I1  a telecaller's supervisor, when set, lists the telecaller as a member.
//!   I2  telecallers own no team; supervisors and admins have no supervisor.

use crate::{
    authorization_gate::{can_manage_user, require_role, Identity},
    error::{CrmError, CrmResult},
    event::CrmEvent,
    store::CrmStore,
    types::{AgentStatus, Role, Timestamp, UserId},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub department: Option<String>,
    pub is_active: bool,
    pub is_available: bool,
    pub current_status: AgentStatus,
    pub supervisor: Option<UserId>,
    pub team_members: BTreeSet<UserId>,
    pub total_leads: i64,
    pub total_calls: i64,
    pub successful_calls: i64,
    pub last_active: Option<Timestamp>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub supervisor_id: Option<UserId>,
}

impl NewUser {
    pub fn new(name: &str, email: &str, role: Role) -> Self {
        Self {
            name: name.to_string(),
            email: email.to_string(),
            role,
            department: None,
            supervisor_id: None,
        }
    }

    pub fn with_supervisor(mut self, supervisor_id: &str) -> Self {
        self.supervisor_id = Some(supervisor_id.to_string());
        self
    }

    pub fn in_department(mut self, department: &str) -> Self {
        self.department = Some(department.to_string());
        self
    }
}

/// A broken I1/I2 condition found by `TeamDirectory::audit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum TeamViolation {
    /// I1: the supervisor is missing or does not list the telecaller.
    DanglingSupervisor { telecaller_id: UserId, supervisor_id: UserId },
    /// I2: a telecaller owns team members.
    TelecallerOwnsTeam { user_id: UserId },
    /// I2: a supervisor or admin has a supervisor.
    ManagerHasSupervisor { user_id: UserId },
}

pub struct TeamDirectory<'a> {
    store: &'a CrmStore,
}

impl<'a> TeamDirectory<'a> {
    pub fn new(store: &'a CrmStore) -> Self {
        Self { store }
    }

    pub fn create_user(&self, new: NewUser, now: Timestamp) -> CrmResult<(UserRecord, Vec<CrmEvent>)> {
        let name = new.name.trim();
        let email = new.email.trim().to_lowercase();
        if name.is_empty() {
            return Err(CrmError::Validation("name must not be empty".into()));
        }
        if !email.contains('@') {
            return Err(CrmError::Validation(format!("invalid email '{email}'")));
        }
        if new.supervisor_id.is_some() && new.role != Role::Telecaller {
            return Err(CrmError::Validation(format!(
                "only telecallers have a supervisor, not {}",
                new.role
            )));
        }

        self.store.with_transaction(|store| {
            if store.email_taken(&email)? {
                return Err(CrmError::Validation(format!("email '{email}' already registered")));
            }
            let user = UserRecord {
                user_id: format!("usr-{}", Uuid::new_v4().simple()),
                name: name.to_string(),
                email: email.clone(),
                role: new.role,
                department: new.department.clone(),
                is_active: true,
                is_available: true,
                current_status: AgentStatus::Offline,
                supervisor: None,
                team_members: BTreeSet::new(),
                total_leads: 0,
                total_calls: 0,
                successful_calls: 0,
                last_active: None,
                created_at: now,
            };
            store.insert_user(&user)?;
            let mut events = vec![CrmEvent::UserCreated {
                user_id: user.user_id.clone(),
                role: user.role,
            }];
            if let Some(supervisor_id) = &new.supervisor_id {
                events.extend(TeamDirectory::new(store).assign_supervisor(&user.user_id, supervisor_id)?);
            }
            log::info!("created {} {}", user.role, user.user_id);
            Ok((store.get_user(&user.user_id)?, events))
        })
    }

    /// Move `telecaller_id` under `supervisor_id`.
    ///
    /// The telecaller leaves every team that lists it before it joins the
    /// new one; if leaving fails nothing is added.
    pub fn assign_supervisor(&self, telecaller_id: &str, supervisor_id: &str) -> CrmResult<Vec<CrmEvent>> {
        self.store.with_transaction(|store| {
            let telecaller = store.get_user(telecaller_id)?;
            let supervisor = store.get_user(supervisor_id)?;
            if telecaller.role != Role::Telecaller {
                return Err(CrmError::Validation(format!(
                    "'{telecaller_id}' is a {}, not a telecaller",
                    telecaller.role
                )));
            }
            if supervisor.role != Role::Supervisor {
                return Err(CrmError::Validation(format!(
                    "'{supervisor_id}' is a {}, not a supervisor",
                    supervisor.role
                )));
            }
            if !supervisor.is_active {
                return Err(CrmError::Validation(format!(
                    "supervisor '{supervisor_id}' is deactivated"
                )));
            }
            if telecaller.supervisor.as_deref() == Some(supervisor_id)
                && supervisor.team_members.contains(telecaller_id)
            {
                return Ok(Vec::new());
            }

            store.remove_member_everywhere(telecaller_id)?;
            store.set_supervisor(telecaller_id, None)?;

            store.add_team_member(supervisor_id, telecaller_id)?;
            store.set_supervisor(telecaller_id, Some(supervisor_id))?;

            log::info!(
                "telecaller {telecaller_id} now reports to {supervisor_id} (was {:?})",
                telecaller.supervisor
            );
            Ok(vec![CrmEvent::SupervisorAssigned {
                telecaller_id: telecaller_id.to_string(),
                supervisor_id: supervisor_id.to_string(),
                previous_supervisor: telecaller.supervisor,
            }])
        })
    }

    /// Change a user's role. Admin only.
    ///
    /// Leaving the supervisor role severs every member (their `supervisor`
    /// is unset; nobody re-supervises them). Becoming a telecaller also
    /// empties the user's own team.
    pub fn change_role(&self, identity: Option<&Identity>, user_id: &str, new_role: Role) -> CrmResult<Vec<CrmEvent>> {
        let identity = require_role(identity, &[Role::Admin])?;
        can_manage_user(self.store, identity, user_id)?;

        self.store.with_transaction(|store| {
            let user = store.get_user(user_id)?;
            if user.role == new_role {
                return Ok(Vec::new());
            }
            let mut events = Vec::new();

            if user.role == Role::Supervisor {
                let severed = store.sever_members_of(user_id)?;
                if !severed.is_empty() {
                    log::warn!(
                        "demoting supervisor {user_id}: {} member(s) left without a supervisor",
                        severed.len()
                    );
                    events.push(CrmEvent::TeamSevered {
                        owner_id: user_id.to_string(),
                        former_members: severed,
                    });
                }
            }
            if new_role == Role::Telecaller {
                store.clear_team_members(user_id)?;
            }
            // I2: managers report to nobody.
            if new_role.is_manager() && user.supervisor.is_some() {
                store.remove_member_everywhere(user_id)?;
                store.set_supervisor(user_id, None)?;
            }

            store.set_role(user_id, new_role)?;
            log::info!("role of {user_id} changed {} -> {new_role}", user.role);
            events.push(CrmEvent::RoleChanged {
                user_id: user_id.to_string(),
                from: user.role,
                to: new_role,
            });
            Ok(events)
        })
    }

    /// Detach a user from the team structure before deactivation or deletion.
    pub fn remove_from_team(&self, user_id: &str) -> CrmResult<Vec<CrmEvent>> {
        self.store.with_transaction(|store| {
            let user = store.get_user(user_id)?;
            let mut events = Vec::new();

            if user.supervisor.is_some() {
                store.remove_member_everywhere(user_id)?;
                store.set_supervisor(user_id, None)?;
            }

            let severed = store.sever_members_of(user_id)?;
            store.clear_team_members(user_id)?;
            if !severed.is_empty() {
                log::warn!(
                    "removing {user_id} from teams: {} member(s) left without a supervisor",
                    severed.len()
                );
                events.push(CrmEvent::TeamSevered {
                    owner_id: user_id.to_string(),
                    former_members: severed,
                });
            }
            Ok(events)
        })
    }

    pub fn set_availability(
        &self,
        user_id: &str,
        is_available: bool,
        status: AgentStatus,
        now: Timestamp,
    ) -> CrmResult<Vec<CrmEvent>> {
        let user = self.store.get_user(user_id)?;
        self.store.set_availability(user_id, is_available, status, now)?;
        if user.is_available == is_available && user.current_status == status {
            return Ok(Vec::new());
        }
        Ok(vec![CrmEvent::AvailabilityChanged {
            user_id: user_id.to_string(),
            is_available,
            status,
        }])
    }

    pub fn members_of(&self, owner_id: &str) -> CrmResult<Vec<UserRecord>> {
        let owner = self.store.get_user(owner_id)?;
        self.store.users_by_ids(&owner.team_members)
    }

    /// Every I1/I2 violation currently in the store.
    pub fn audit(&self) -> CrmResult<Vec<TeamViolation>> {
        let users = self.store.all_users()?;
        let mut violations = Vec::new();
        for user in &users {
            match user.role {
                Role::Telecaller => {
                    if let Some(supervisor_id) = &user.supervisor {
                        let listed = users
                            .iter()
                            .find(|s| &s.user_id == supervisor_id)
                            .is_some_and(|s| s.team_members.contains(&user.user_id));
                        if !listed {
                            violations.push(TeamViolation::DanglingSupervisor {
                                telecaller_id: user.user_id.clone(),
                                supervisor_id: supervisor_id.clone(),
                            });
                        }
                    }
                    if !user.team_members.is_empty() {
                        violations.push(TeamViolation::TelecallerOwnsTeam {
                            user_id: user.user_id.clone(),
                        });
                    }
                }
                Role::Supervisor | Role::Admin => {
                    if user.supervisor.is_some() {
                        violations.push(TeamViolation::ManagerHasSupervisor {
                            user_id: user.user_id.clone(),
                        });
                    }
                }
            }
        }
        Ok(violations)
    }
}
