//! Credentials and session invalidation.

use chrono::{DateTime, Duration, Utc};
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::warn;

/// Source of the bearer token attached to requests.
pub trait CredentialProvider: Send + Sync {
    /// Current token, if authenticated.
    fn token(&self) -> Option<String>;

    /// Whether the current token is expired.
    fn is_token_expired(&self) -> bool;
}

/// A bearer token with optional expiry.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Seconds of clock skew tolerated before expiry.
    const SKEW_SECS: i64 = 30;

    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Check if the token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at < Utc::now() + Duration::seconds(Self::SKEW_SECS),
            None => false,
        }
    }
}

/// In-process credential holder.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    credential: RwLock<Option<Credential>>,
}

impl StaticCredentials {
    pub fn new(credential: Option<Credential>) -> Self {
        Self {
            credential: RwLock::new(credential),
        }
    }

    /// No credential; requests go out unauthenticated.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn set(&self, credential: Credential) {
        if let Ok(mut slot) = self.credential.write() {
            *slot = Some(credential);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.credential.write() {
            *slot = None;
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn token(&self) -> Option<String> {
        self.credential
            .read()
            .ok()
            .and_then(|c| c.as_ref().map(|c| c.token.clone()))
    }

    fn is_token_expired(&self) -> bool {
        self.credential
            .read()
            .ok()
            .and_then(|c| c.as_ref().map(Credential::is_expired))
            .unwrap_or(false)
    }
}

/// Session lifecycle events broadcast to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session must be re-established.
    Expired { reason: String },
}

/// Broadcasts session invalidation.
#[derive(Debug, Clone)]
pub struct SessionNotifier {
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Announce that the session is no longer valid.
    pub fn invalidate(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Session invalidated: {}", reason);
        // No subscribers is fine.
        let _ = self.tx.send(SessionEvent::Expired { reason });
    }
}

impl Default for SessionNotifier {
    fn default() -> Self {
        Self::new()
    }
}
