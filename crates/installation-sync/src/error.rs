//! Error classification for registry exchanges

use thiserror::Error;

/// Classified error surfaced to listeners and the notifier
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Connectivity or transient server failure; retried by the task runner
    #[error("network error: {message}")]
    Network { message: String },

    /// The registry refused the request (validation failure, unknown identity, ...)
    #[error("registry rejected request ({code}): {message}")]
    ServerRejected { code: String, message: String },

    /// The task was cancelled before the exchange completed
    #[error("operation cancelled")]
    Cancelled,

    /// An own-device update was requested before the registry assigned an identity
    #[error("push registration is not available yet")]
    RegistrationUnavailable,
}

impl SyncError {
    pub fn network(message: impl Into<String>) -> Self {
        SyncError::Network {
            message: message.into(),
        }
    }

    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::ServerRejected {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Only network-classified failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network { .. })
    }

    /// Short stable code for logs and the persisted last-error record
    pub fn code(&self) -> &str {
        match self {
            SyncError::Network { .. } => "NETWORK_ERROR",
            SyncError::ServerRejected { code, .. } => code,
            SyncError::Cancelled => "CANCELLED",
            SyncError::RegistrationUnavailable => "REGISTRATION_UNAVAILABLE",
        }
    }
}

/// Failure reported by a [`RemoteRegistryClient`](crate::sync::RemoteRegistryClient)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("registry responded with status {status}: {message}")]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },
}

impl From<RegistryError> for SyncError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Transport(message) => SyncError::Network { message },
            RegistryError::Timeout => SyncError::network("request timed out"),
            RegistryError::Status {
                status, message, ..
            } if status >= 500 || status == 429 => SyncError::Network {
                message: format!("status {}: {}", status, message),
            },
            RegistryError::Status {
                status,
                code,
                message,
            } => SyncError::ServerRejected {
                code: code.unwrap_or_else(|| status.to_string()),
                message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failures_are_retryable() {
        assert!(SyncError::from(RegistryError::Transport("reset".into())).is_retryable());
        assert!(SyncError::from(RegistryError::Timeout).is_retryable());
    }

    #[test]
    fn test_server_errors_classification() {
        let unavailable = SyncError::from(RegistryError::Status {
            status: 503,
            code: None,
            message: "maintenance".into(),
        });
        assert!(unavailable.is_retryable());

        let throttled = SyncError::from(RegistryError::Status {
            status: 429,
            code: None,
            message: "slow down".into(),
        });
        assert!(throttled.is_retryable());

        let invalid = SyncError::from(RegistryError::Status {
            status: 400,
            code: Some("INVALID_TOKEN".into()),
            message: "token is malformed".into(),
        });
        assert!(!invalid.is_retryable());
        assert_eq!(invalid.code(), "INVALID_TOKEN");
    }

    #[test]
    fn test_rejection_without_code_uses_status() {
        let err = SyncError::from(RegistryError::Status {
            status: 404,
            code: None,
            message: "no such installation".into(),
        });
        assert_eq!(
            err,
            SyncError::rejected("404", "no such installation")
        );
    }

    #[test]
    fn test_cancelled_and_unavailable_are_terminal() {
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::RegistrationUnavailable.is_retryable());
        assert_eq!(SyncError::Cancelled.code(), "CANCELLED");
    }
}
