use crate::types::{LeadId, Role};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrmError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Authentication required: {0}")]
    Authentication(String),

    #[error("Not authorized: requires {required}, caller is {actual}")]
    Authorization { required: String, actual: String },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("No eligible telecaller for lead '{lead_id}'")]
    AssignmentExhausted { lead_id: LeadId },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CrmResult<T> = Result<T, CrmError>;

impl CrmError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CrmError::NotFound { entity, id: id.into() }
    }

    /// Role check failure. The payload names roles only, never other users' data.
    pub fn forbidden_role(required: &[Role], actual: Role) -> Self {
        let required = required
            .iter()
            .map(Role::as_str)
            .collect::<Vec<_>>()
            .join("|");
        CrmError::Authorization { required, actual: actual.to_string() }
    }

    /// Relationship check failure (caller has the right role, wrong target).
    pub fn forbidden_relationship(required: &str, actual: Role) -> Self {
        CrmError::Authorization {
            required: required.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Status code used by whichever HTTP transport wraps the core.
    pub fn http_status(&self) -> u16 {
        match self {
            CrmError::Validation(_) => 400,
            CrmError::Authentication(_) => 401,
            CrmError::Authorization { .. } => 403,
            CrmError::NotFound { .. } => 404,
            CrmError::AssignmentExhausted { .. } => 409,
            _ => 500,
        }
    }
}
