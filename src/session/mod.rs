//! Client-side view of the hosted auth session.
//!
//! The hosted auth service owns credentials and tokens. This module defines the
//! values it hands out ([`Session`], [`UserIdentity`]), the change notifications
//! it emits ([`SessionChange`]) and the [`SessionMirror`] that keeps one
//! process-wide copy of "who is signed in, and are they the admin".

pub mod admin;
pub mod mirror;
pub mod store;

pub use admin::AdminPolicy;
pub use mirror::{MirrorSnapshot, MirrorState, Phase, SessionMirror};
pub use store::{SessionHub, SessionStore, SessionSubscription, SubscriptionHandle};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Identity attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Opaque user id issued by the auth service
    pub id: String,
    /// Sign-in email, if the account has one
    #[serde(default)]
    pub email: Option<String>,
    /// Role claim from the account's app metadata
    #[serde(default)]
    pub role: Option<String>,
}

impl UserIdentity {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: Some(email.into()),
            role: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// A signed-in session as issued by the auth service.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    /// Expiry as unix seconds
    pub expires_at: Option<i64>,
    pub user: UserIdentity,
}

impl Session {
    pub fn new(access_token: impl Into<String>, user: UserIdentity) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: None,
            expires_at: None,
            user,
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.user.email.as_deref()
    }

    /// True if the session has an expiry and it is within `leeway_secs` of now.
    /// Sessions without an expiry are treated as valid.
    pub fn expires_within(&self, leeway_secs: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => chrono::Utc::now().timestamp() + leeway_secs >= expires_at,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_within(0)
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.user == other.user
            && self.expires_at == other.expires_at
            && self.access_token.expose_secret() == other.access_token.expose_secret()
            && self.refresh_token.as_ref().map(|t| t.expose_secret())
                == other.refresh_token.as_ref().map(|t| t.expose_secret())
    }
}

/// Email and password for a password sign-in.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into().trim().to_string(),
            password: SecretString::from(password.into()),
        }
    }
}

/// Why the auth service emitted a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Resolution of the start-up probe
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::InitialSession => write!(f, "initial_session"),
            ChangeKind::SignedIn => write!(f, "signed_in"),
            ChangeKind::SignedOut => write!(f, "signed_out"),
            ChangeKind::TokenRefreshed => write!(f, "token_refreshed"),
        }
    }
}

/// A session change notification. The payload is the session now current,
/// or `None` when nobody is signed in.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionChange {
    pub kind: ChangeKind,
    pub session: Option<Session>,
    /// Monotonic stamp from the emitting store. Unstamped changes are always applied.
    pub version: Option<u64>,
}

impl SessionChange {
    pub fn new(kind: ChangeKind, session: Option<Session>) -> Self {
        Self {
            kind,
            session,
            version: None,
        }
    }

    pub fn initial(session: Option<Session>) -> Self {
        Self::new(ChangeKind::InitialSession, session)
    }

    pub fn signed_in(session: Session) -> Self {
        Self::new(ChangeKind::SignedIn, Some(session))
    }

    pub fn signed_out() -> Self {
        Self::new(ChangeKind::SignedOut, None)
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }
}
