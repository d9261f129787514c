//! Error taxonomy shared by the daemon and its clients.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiagError {
    #[error("invalid value for '{field}': {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("debug pod {pod} did not reach Running within {timeout_secs}s")]
    ProvisioningTimeout { pod: String, timeout_secs: u64 },

    #[error("{message}")]
    ExecutionFailure {
        message: String,
        stderr: String,
        exit_code: Option<i32>,
    },

    #[error("not found: {0}")]
    ResourceNotFound(String),

    #[error("tool unavailable: {0}")]
    UnavailableTool(String),
}

pub type DiagResult<T> = Result<T, DiagError>;

impl DiagError {
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        DiagError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn execution(
        message: impl Into<String>,
        stderr: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        DiagError::ExecutionFailure {
            message: message.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// JSON-RPC error code for this failure
    pub fn code(&self) -> i32 {
        match self {
            DiagError::InvalidInput { .. } => -32602,
            DiagError::InvalidTarget(_) => -32010,
            DiagError::ProvisioningTimeout { .. } => -32011,
            DiagError::ExecutionFailure { .. } => -32012,
            DiagError::ResourceNotFound(_) => -32013,
            DiagError::UnavailableTool(_) => -32014,
        }
    }

    /// Stable taxonomy name, used on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            DiagError::InvalidInput { .. } => "invalid_input",
            DiagError::InvalidTarget(_) => "invalid_target",
            DiagError::ProvisioningTimeout { .. } => "provisioning_timeout",
            DiagError::ExecutionFailure { .. } => "execution_failure",
            DiagError::ResourceNotFound(_) => "resource_not_found",
            DiagError::UnavailableTool(_) => "unavailable_tool",
        }
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, DiagError::InvalidInput { .. })
    }
}

/// Structured failure as returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl From<&DiagError> for ToolError {
    fn from(err: &DiagError) -> Self {
        let (field, stderr, exit_code) = match err {
            DiagError::InvalidInput { field, .. } => (Some(field.clone()), None, None),
            DiagError::ExecutionFailure {
                stderr, exit_code, ..
            } => {
                let stderr = if stderr.is_empty() {
                    None
                } else {
                    Some(stderr.clone())
                };
                (None, stderr, *exit_code)
            }
            _ => (None, None, None),
        };

        ToolError {
            kind: err.kind().to_string(),
            message: err.to_string(),
            field,
            stderr,
            exit_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_names_field() {
        let err = DiagError::invalid_input("interface", "name too long");
        assert_eq!(err.to_string(), "invalid value for 'interface': name too long");
        assert_eq!(err.code(), -32602);

        let wire = ToolError::from(&err);
        assert_eq!(wire.kind, "invalid_input");
        assert_eq!(wire.field.as_deref(), Some("interface"));
    }

    #[test]
    fn test_execution_failure_carries_stderr() {
        let err = DiagError::execution("tcpdump exited with status 1", "no such device", Some(1));
        let wire = ToolError::from(&err);
        assert_eq!(wire.stderr.as_deref(), Some("no such device"));
        assert_eq!(wire.exit_code, Some(1));

        let json = serde_json::to_string(&wire).unwrap();
        assert!(json.contains("\"kind\":\"execution_failure\""));
        assert!(!json.contains("\"field\""));
    }

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            DiagError::invalid_input("f", "r"),
            DiagError::InvalidTarget("t".into()),
            DiagError::ProvisioningTimeout {
                pod: "p".into(),
                timeout_secs: 60,
            },
            DiagError::execution("m", "", None),
            DiagError::ResourceNotFound("r".into()),
            DiagError::UnavailableTool("omc".into()),
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}
