//! Authorization gate: stateless predicates over an explicit identity.
//!
//! RULE: nothing here reads ambient request state. Every check takes the
//! caller's `Identity` as a value and evaluates once against loaded data.

use crate::{
    error::{CrmError, CrmResult},
    store::CrmStore,
    team_directory::UserRecord,
    types::{Role, UserId},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The resolved caller, as supplied by the identity/session collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub role: Role,
    pub is_active: bool,
    pub team_members: BTreeSet<UserId>,
    pub supervisor: Option<UserId>,
}

impl From<&UserRecord> for Identity {
    fn from(u: &UserRecord) -> Self {
        Self {
            id: u.user_id.clone(),
            role: u.role,
            is_active: u.is_active,
            team_members: u.team_members.clone(),
            supervisor: u.supervisor.clone(),
        }
    }
}

/// Fails when no identity is present or the account is deactivated.
pub fn authenticate(identity: Option<&Identity>) -> CrmResult<&Identity> {
    let identity =
        identity.ok_or_else(|| CrmError::Authentication("no identity supplied".into()))?;
    if !identity.is_active {
        return Err(CrmError::Authentication(format!(
            "account '{}' is deactivated",
            identity.id
        )));
    }
    Ok(identity)
}

pub fn require_role<'a>(identity: Option<&'a Identity>, allowed: &[Role]) -> CrmResult<&'a Identity> {
    let identity = authenticate(identity)?;
    if !allowed.contains(&identity.role) {
        return Err(CrmError::forbidden_role(allowed, identity.role));
    }
    Ok(identity)
}

/// Owners see their own resources; admins and supervisors see everything.
pub fn can_access_resource(identity: &Identity, resource_owner_id: &str) -> bool {
    identity.id == resource_owner_id || identity.role.is_manager()
}

/// `can_access_resource` as a gate.
pub fn require_resource_access(identity: &Identity, resource_owner_id: &str) -> CrmResult<()> {
    if can_access_resource(identity, resource_owner_id) {
        Ok(())
    } else {
        Err(CrmError::forbidden_relationship("resource owner", identity.role))
    }
}

/// Decide whether `identity` may manage `target`, which is already loaded.
pub fn may_manage(identity: &Identity, target: &UserRecord) -> CrmResult<()> {
    let allowed = match identity.role {
        Role::Admin => true,
        Role::Supervisor => {
            identity.team_members.contains(&target.user_id)
                || target.supervisor.as_deref() == Some(identity.id.as_str())
        }
        Role::Telecaller => target.user_id == identity.id,
    };
    if allowed {
        Ok(())
    } else {
        let required = match identity.role {
            Role::Supervisor => "supervisor of target",
            _ => "self",
        };
        Err(CrmError::forbidden_relationship(required, identity.role))
    }
}

/// Resolve `target_id` and check `may_manage`. Gatekeeper for every team
/// mutation and every per-user statistics read.
pub fn can_manage_user(store: &CrmStore, identity: &Identity, target_id: &str) -> CrmResult<UserRecord> {
    let target = store.get_user(target_id)?;
    may_manage(identity, &target)?;
    Ok(target)
}
