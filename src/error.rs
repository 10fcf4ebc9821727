//! Error handling module for the testbed provisioner
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Library code returns these types; the binary wraps them in `anyhow`.

use std::fmt;
use thiserror::Error;

/// Kind of dashboard entity an approval refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    User,
    Client,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// Main error type for the testbed provisioner
#[derive(Error, Debug)]
pub enum TestbedError {
    /// IO errors (job directories, downloaded bundles, launch scripts)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Scenario configuration errors (missing org_admin, empty users, missing override scope)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Non-success response from the deployment platform or the dashboard
    #[error("Remote call failed ({context}, HTTP {status}): {body}")]
    Remote {
        context: String,
        status: u16,
        body: String,
    },

    /// Server reported an approval state other than the requested one
    #[error("Could not approve {kind} {name} (server reported approval_state {state})")]
    ApprovalMismatch {
        kind: EntityKind,
        name: String,
        state: i64,
    },

    /// Bundle download returned something other than 200
    #[error("Download from {url} failed with HTTP {status}")]
    Download { url: String, status: u16 },

    /// Readiness poll gave up
    #[error("url check for {url} failed after {attempts}/{max_attempts} attempts")]
    Timeout {
        url: String,
        attempts: u32,
        max_attempts: u32,
    },

    /// Detached task could not be spawned
    #[error("Failed to launch {program}: {reason}")]
    Launch { program: String, reason: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport errors (connect, TLS, body decoding)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for provisioning operations
pub type Result<T> = std::result::Result<T, TestbedError>;

impl TestbedError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a remote-call error carrying the raw response body
    pub fn remote(context: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Remote {
            context: context.into(),
            status,
            body: body.into(),
        }
    }

    /// Returns true for errors caused by the scenario/job documents
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TestbedError::config("missing a user with org_admin role");
        assert_eq!(
            err.to_string(),
            "Configuration error: missing a user with org_admin role"
        );

        let err = TestbedError::Timeout {
            url: "http://dash".to_string(),
            attempts: 4,
            max_attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "url check for http://dash failed after 4/3 attempts"
        );
    }

    #[test]
    fn test_approval_mismatch_display() {
        let err = TestbedError::ApprovalMismatch {
            kind: EntityKind::Client,
            name: "site-1".to_string(),
            state: 0,
        };
        assert_eq!(
            err.to_string(),
            "Could not approve client site-1 (server reported approval_state 0)"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TestbedError = io_err.into();
        assert!(matches!(err, TestbedError::Io(_)));
        assert!(!err.is_config());
    }

    #[test]
    fn test_error_constructors() {
        let err = TestbedError::remote("login", 401, "{\"status\":\"unauthorized\"}");
        assert!(matches!(err, TestbedError::Remote { status: 401, .. }));

        assert!(TestbedError::config("x").is_config());
    }
}
