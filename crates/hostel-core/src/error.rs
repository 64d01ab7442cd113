use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the hostel client crates.
///
/// Every variant renders as a message that can be shown to an operator as-is;
/// callers that only need the text use `to_string()`.
#[derive(Error, Debug)]
pub enum HostelError {
    /// Bad credentials, rejected signup, or an invalid refresh token.
    #[error("{0}")]
    Auth(String),

    /// An operation needed a session but nobody is signed in.
    #[error("Not signed in")]
    NoSession,

    /// The session was cleared (logout or forced logout) while the operation
    /// was in flight.
    #[error("Session ended while the request was in flight")]
    SessionEnded,

    /// A call exceeded its fixed time budget.
    #[error("Request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The transport failed before a response arrived.
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status.
    #[error("{message}")]
    Http { status: u16, message: String },

    /// The backend reported `success: false` inside its response envelope.
    #[error("{0}")]
    Api(String),

    /// A response arrived but did not carry what the contract promised.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Input rejected before it was sent.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The realtime change feed failed.
    #[error("Realtime error: {0}")]
    Realtime(String),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A persisted file could not be read or written.
    #[error("Failed to access {path}: {source}")]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HostelError {
    /// Build an [`HostelError::Http`] from a status and an optional server
    /// message, falling back to the generic status text.
    pub fn http(status: u16, server_message: Option<String>) -> Self {
        let message = server_message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| format!("HTTP error! status: {status}"));
        HostelError::Http { status, message }
    }

    /// `true` for failures worth re-attempting unchanged: timeouts and
    /// transport errors. Server answers are never transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, HostelError::Timeout { .. } | HostelError::Network(_))
    }
}

/// Convenience alias used throughout the hostel crates.
pub type Result<T> = std::result::Result<T, HostelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_auth_is_verbatim() {
        let err = HostelError::Auth("Invalid credentials".to_string());
        assert_eq!(err.to_string(), "Invalid credentials");
    }

    #[test]
    fn test_error_display_timeout() {
        let err = HostelError::Timeout { secs: 10 };
        assert_eq!(err.to_string(), "Request timed out after 10s");
    }

    #[test]
    fn test_http_uses_server_message_when_present() {
        let err = HostelError::http(422, Some("room is full".to_string()));
        assert_eq!(err.to_string(), "room is full");
    }

    #[test]
    fn test_http_falls_back_to_status_message() {
        assert_eq!(
            HostelError::http(503, None).to_string(),
            "HTTP error! status: 503"
        );
        assert_eq!(
            HostelError::http(500, Some("  ".to_string())).to_string(),
            "HTTP error! status: 500"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(HostelError::Timeout { secs: 8 }.is_transient());
        assert!(HostelError::Network("reset".to_string()).is_transient());
        assert!(!HostelError::http(500, None).is_transient());
        assert!(!HostelError::Auth("nope".to_string()).is_transient());
        assert!(!HostelError::NoSession.is_transient());
    }

    #[test]
    fn test_error_display_file_access() {
        let err = HostelError::FileAccess {
            path: PathBuf::from("/tmp/session.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/tmp/session.json"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{invalid}").unwrap_err();
        let err: HostelError = json_err.into();
        assert!(err.to_string().contains("Failed to parse JSON"));
    }
}
