/// Shared error and result types for netseg
use thiserror::Error;

/// Custom error types for netseg
#[derive(Error, Debug)]
pub enum NetsegError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Topology file error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Topology validation failed:\n{}", .0.join("\n"))]
    Validation(Vec<String>),

    #[error("Failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("Command '{command}' failed (exit code {exit_code:?}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Topology not provisioned: missing isolation context(s) {0:?}. Run setup first.")]
    NotProvisioned(Vec<String>),

    #[error("Setup aborted: {0}")]
    Setup(String),
}

impl NetsegError {
    /// A creation that failed because the resource already exists
    pub fn is_conflict(&self) -> bool {
        matches!(self, NetsegError::CommandFailed { stderr, .. } if stderr.contains("File exists"))
    }

    /// Process exit code used by the CLI for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            NetsegError::Config(_) | NetsegError::Validation(_) | NetsegError::Json(_) => 78,
            NetsegError::NotProvisioned(_) => 3,
            _ => 1,
        }
    }
}

/// Result type for netseg operations
pub type Result<T> = std::result::Result<T, NetsegError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> NetsegError {
        NetsegError::CommandFailed {
            command: "ip netns add router".into(),
            exit_code: Some(1),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn test_conflict_detection() {
        assert!(failed("Cannot create namespace file \"/run/netns/router\": File exists").is_conflict());
        assert!(failed("RTNETLINK answers: File exists").is_conflict());
        assert!(!failed("Operation not permitted").is_conflict());
        assert!(!NetsegError::Setup("File exists".into()).is_conflict());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(NetsegError::Validation(vec![]).exit_code(), 78);
        assert_eq!(NetsegError::NotProvisioned(vec![]).exit_code(), 3);
        assert_eq!(failed("boom").exit_code(), 1);
    }
}
