use chrono::NaiveDate;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("evaluation store read failed for agent {agent_id}: {source}")]
    Store {
        agent_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("report cache operation failed for {key}: {source}")]
    Cache {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("rejected evaluation record ({field}): {reason}")]
    InvalidRecord { field: String, reason: String },

    #[error("report unavailable for agent {agent_id} in {period}")]
    Unavailable { agent_id: String, period: String },

    #[error("period end {end} is before start {start}")]
    InvalidPeriod { start: NaiveDate, end: NaiveDate },

    #[error("malformed period key: {0}")]
    InvalidPeriodKey(String),
}

impl EngineError {
    pub fn store(agent_id: &str, source: impl Into<anyhow::Error>) -> Self {
        EngineError::Store {
            agent_id: agent_id.to_string(),
            source: source.into(),
        }
    }

    pub fn invalid_record(field: &str, reason: impl Into<String>) -> Self {
        EngineError::InvalidRecord {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
