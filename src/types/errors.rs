use thiserror::Error;

use super::Verdict;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    /// Timeout, refused connection, DNS failure
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Unexpected status code or malformed response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The authenticated workflow did not reach the state this check needs
    #[error("Prerequisite not met: {0}")]
    Prerequisite(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuditError {
    /// Verdict a check degrades to when evaluation raises this fault.
    pub fn verdict(&self) -> Verdict {
        match self {
            AuditError::Connectivity(_) | AuditError::Prerequisite(_) => Verdict::Indeterminate,
            AuditError::Protocol(_) | AuditError::InvalidConfig(_) | AuditError::Internal(_) => {
                Verdict::Fail
            }
        }
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, AuditError::Connectivity(_))
    }
}

impl From<reqwest::Error> for AuditError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            AuditError::Connectivity(err.to_string())
        } else {
            AuditError::Protocol(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        AuditError::Protocol(format!("JSON parse error: {}", err))
    }
}
