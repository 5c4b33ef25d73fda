//! Common error types for Wayfarer.

use thiserror::Error;

/// Top-level error type for Wayfarer operations.
///
/// Only `Offline` sends a caller down the local-store/queue fallback path.
#[derive(Debug, Error)]
pub enum Error {
    /// No response reached the client (transport failure).
    #[error("Offline: {0}")]
    Offline(String),

    /// The backend answered with a non-2xx status.
    #[error("Remote error {status}: {body}")]
    Remote { status: u16, body: String },

    /// Credentials expired or were rejected; the session was invalidated.
    #[error("Session expired")]
    SessionExpired,

    /// The local store failed. The durability guarantee is broken.
    #[error("Local store error: {0}")]
    LocalStore(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Local resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error category used for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport failure; fall back to local data.
    Offline,
    /// Remote 404.
    NotFound,
    /// Any other remote rejection.
    Application,
    /// Terminal; re-authentication required.
    SessionExpired,
    /// Local store failure.
    LocalStore,
    /// Everything else (bad input, decoding, I/O).
    Other,
}

impl Error {
    /// Build a remote error from a status code and response body.
    pub fn remote(status: u16, body: impl Into<String>) -> Self {
        Self::Remote {
            status,
            body: body.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Offline(_) => ErrorKind::Offline,
            Self::Remote { status: 404, .. } => ErrorKind::NotFound,
            Self::Remote { .. } => ErrorKind::Application,
            Self::SessionExpired => ErrorKind::SessionExpired,
            Self::LocalStore(_) => ErrorKind::LocalStore,
            _ => ErrorKind::Other,
        }
    }

    /// True for the offline signal.
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Offline(_))
    }

    /// True for a remote 404.
    pub fn is_remote_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::Offline("down".into()).kind(), ErrorKind::Offline);
        assert_eq!(Error::remote(404, "gone").kind(), ErrorKind::NotFound);
        assert_eq!(Error::remote(422, "bad").kind(), ErrorKind::Application);
        assert_eq!(Error::remote(500, "").kind(), ErrorKind::Application);
        assert_eq!(Error::SessionExpired.kind(), ErrorKind::SessionExpired);
        assert_eq!(Error::LocalStore("x".into()).kind(), ErrorKind::LocalStore);
        assert_eq!(Error::InvalidInput("x".into()).kind(), ErrorKind::Other);
    }

    #[test]
    fn test_offline_and_remote_are_distinct() {
        let offline = Error::Offline("connection refused".into());
        let remote = Error::remote(503, "unavailable");

        assert!(offline.is_offline());
        assert!(!remote.is_offline());
        assert!(!offline.is_remote_not_found());
        assert!(Error::remote(404, "").is_remote_not_found());
    }

    #[test]
    fn test_display() {
        let err = Error::remote(409, "duplicate");
        assert_eq!(err.to_string(), "Remote error 409: duplicate");
    }
}
