use crate::{
    error::{CrmError, CrmResult},
    types::{AgentStatus, LeadStatus},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentConfig {
    /// Agent statuses that put an active, available telecaller in the primary pool.
    pub eligible_statuses: Vec<AgentStatus>,
    /// Lead statuses that are never redistributed when an agent is removed.
    pub terminal_lead_statuses: Vec<LeadStatus>,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            eligible_statuses: vec![AgentStatus::Available, AgentStatus::Break],
            terminal_lead_statuses: vec![LeadStatus::Converted, LeadStatus::Closed],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    pub min_rating: u8,
    pub max_rating: u8,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self { min_rating: 1, max_rating: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmConfig {
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub assignment: AssignmentConfig,
    #[serde(default)]
    pub reviews: ReviewConfig,
}

fn default_database() -> String {
    "telecrm.db".to_string()
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            assignment: AssignmentConfig::default(),
            reviews: ReviewConfig::default(),
        }
    }
}

impl CrmConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: &str) -> CrmResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> CrmResult<Self> {
        let config: CrmConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CrmResult<()> {
        if self.assignment.eligible_statuses.is_empty() {
            return Err(CrmError::Validation(
                "assignment.eligible_statuses must not be empty".into(),
            ));
        }
        if self.reviews.min_rating > self.reviews.max_rating {
            return Err(CrmError::Validation(format!(
                "reviews.min_rating ({}) exceeds reviews.max_rating ({})",
                self.reviews.min_rating, self.reviews.max_rating
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config = CrmConfig::from_json(r#"{ "database": "x.db" }"#).unwrap();
        assert_eq!(config.database, "x.db");
        assert_eq!(
            config.assignment.eligible_statuses,
            vec![AgentStatus::Available, AgentStatus::Break]
        );
        assert_eq!(config.reviews.max_rating, 5);
    }

    #[test]
    fn empty_eligible_statuses_rejected() {
        let json = r#"{
            "assignment": { "eligible_statuses": [], "terminal_lead_statuses": ["closed"] }
        }"#;
        assert!(matches!(
            CrmConfig::from_json(json),
            Err(CrmError::Validation(_))
        ));
    }

    #[test]
    fn inverted_rating_range_rejected() {
        let json = r#"{ "reviews": { "min_rating": 5, "max_rating": 1 } }"#;
        assert!(CrmConfig::from_json(json).is_err());
    }

    #[test]
    fn unknown_status_is_a_parse_error() {
        let json = r#"{
            "assignment": { "eligible_statuses": ["sleeping"], "terminal_lead_statuses": [] }
        }"#;
        assert!(matches!(
            CrmConfig::from_json(json),
            Err(CrmError::Serialization(_))
        ));
    }

    #[test]
    fn shipped_config_parses() {
        let config = CrmConfig::from_json(include_str!("../../data/crm_config.json")).unwrap();
        assert_eq!(config.assignment.terminal_lead_statuses.len(), 2);
    }
}
