//! Session store backed by the hosted auth REST API.
//!
//! Password sign-in and refresh go through `/auth/v1/token`, sign-out through
//! `/auth/v1/logout`. The current session is kept in memory and, when a
//! session file is configured, persisted so the next run can resume it.

use super::{error_message, http_client};
use crate::error::AuthError;
use crate::session::store::{SessionHub, SessionStore, SessionSubscription, SubscriptionHandle};
use crate::session::{Credentials, Session, SessionChange, UserIdentity};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Refresh tokens this close to expiry rather than hand out a dying session.
const REFRESH_LEEWAY_SECS: i64 = 60;

/// Token grant response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Lifetime in seconds
    #[serde(default)]
    expires_in: Option<i64>,
    /// Absolute expiry, unix seconds
    #[serde(default)]
    expires_at: Option<i64>,
    user: WireUser,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    app_metadata: Value,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| chrono::Utc::now().timestamp() + secs));
        let role = self
            .user
            .app_metadata
            .get("role")
            .and_then(|r| r.as_str())
            .map(str::to_string);
        Session {
            access_token: SecretString::from(self.access_token),
            refresh_token: self.refresh_token.map(SecretString::from),
            expires_at,
            user: UserIdentity {
                id: self.user.id,
                email: self.user.email,
                role,
            },
        }
    }
}

/// On-disk form of a session
#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: UserIdentity,
}

impl From<&Session> for StoredSession {
    fn from(session: &Session) -> Self {
        Self {
            access_token: session.access_token.expose_secret().to_string(),
            refresh_token: session
                .refresh_token
                .as_ref()
                .map(|t| t.expose_secret().to_string()),
            expires_at: session.expires_at,
            user: session.user.clone(),
        }
    }
}

impl From<StoredSession> for Session {
    fn from(stored: StoredSession) -> Self {
        Session {
            access_token: SecretString::from(stored.access_token),
            refresh_token: stored.refresh_token.map(SecretString::from),
            expires_at: stored.expires_at,
            user: stored.user,
        }
    }
}

fn save_session(path: &Path, session: &Session) -> Result<(), AuthError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(&StoredSession::from(session))
        .map_err(|e| AuthError::Decode(e.to_string()))?;
    fs::write(path, json)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// A missing or unreadable file means no saved session.
fn load_session(path: &Path) -> Option<Session> {
    let json = fs::read_to_string(path).ok()?;
    match serde_json::from_str::<StoredSession>(&json) {
        Ok(stored) => Some(stored.into()),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt session file");
            None
        }
    }
}

fn remove_session(path: &Path) -> Result<(), AuthError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub struct HostedAuth {
    client: reqwest::Client,
    base_url: String,
    anon_key: SecretString,
    hub: SessionHub,
    current: Mutex<Option<Session>>,
    session_file: Option<PathBuf>,
}

impl HostedAuth {
    pub fn new(base_url: &str, anon_key: SecretString) -> reqwest::Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key,
            hub: SessionHub::new(),
            current: Mutex::new(None),
            session_file: None,
        })
    }

    /// Persist sessions to `path` and resume from it.
    pub fn with_session_file(mut self, path: PathBuf) -> Self {
        self.session_file = Some(path);
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<Session>> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn held_session(&self) -> Option<Session> {
        let mut current = self.lock_current();
        if current.is_none() {
            *current = self.session_file.as_deref().and_then(load_session);
        }
        current.clone()
    }

    /// Replace the held session, in memory and on disk.
    fn remember(&self, session: Option<&Session>) {
        let mut current = self.lock_current();
        self.persist(&mut current, session);
    }

    /// Replace the held session only while it is still `expected`. A sign-in
    /// or sign-out that landed in the meantime is kept. Returns the session
    /// held afterwards.
    fn replace_held(&self, expected: &Session, next: Option<&Session>) -> Option<Session> {
        let mut current = self.lock_current();
        let unchanged = current.as_ref().is_some_and(|held| {
            held.access_token.expose_secret() == expected.access_token.expose_secret()
        });
        if unchanged {
            self.persist(&mut current, next);
        } else {
            tracing::debug!("session changed during refresh, keeping the newer one");
        }
        current.clone()
    }

    fn persist(&self, current: &mut Option<Session>, session: Option<&Session>) {
        *current = session.cloned();
        let Some(path) = &self.session_file else {
            return;
        };
        let result = match session {
            Some(session) => save_session(path, session),
            None => remove_session(path),
        };
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to update session file");
        }
    }

    async fn token_grant(&self, grant_type: &str, body: Value) -> Result<Session, AuthError> {
        let resp = self
            .client
            .post(self.endpoint("token"))
            .query(&[("grant_type", grant_type)])
            .header("apikey", self.anon_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            let token: TokenResponse = resp.json().await?;
            return Ok(token.into_session());
        }

        let status = status.as_u16();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        Err(AuthError::Rejected {
            status,
            message: error_message(&body, status),
        })
    }

    /// Refresh a session near or past expiry. A rejected refresh token drops
    /// the session; transport failures propagate.
    async fn renew(&self, session: Session) -> Result<Option<Session>, AuthError> {
        let Some(refresh_token) = session.refresh_token.clone() else {
            if session.is_expired() {
                return Ok(self.replace_held(&session, None));
            }
            return Ok(Some(session));
        };

        let body = json!({ "refresh_token": refresh_token.expose_secret() });
        match self.token_grant("refresh_token", body).await {
            Ok(fresh) => {
                tracing::debug!(email = ?fresh.email(), "session refreshed");
                Ok(self.replace_held(&session, Some(&fresh)))
            }
            Err(AuthError::Rejected { status, message }) => {
                tracing::warn!(status, %message, "refresh rejected, dropping saved session");
                Ok(self.replace_held(&session, None))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait::async_trait]
impl SessionStore for HostedAuth {
    async fn probe_current_session(&self) -> Result<SessionChange, AuthError> {
        let version = self.hub.current_version();
        let session = match self.held_session() {
            Some(session) if session.expires_within(REFRESH_LEEWAY_SECS) => {
                self.renew(session).await?
            }
            other => other,
        };
        Ok(SessionChange::initial(session).with_version(version))
    }

    fn subscribe(&self) -> SessionSubscription {
        self.hub.subscribe()
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.hub.unsubscribe(handle);
    }

    async fn sign_in_with_password(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        let body = json!({
            "email": credentials.email,
            "password": credentials.password.expose_secret(),
        });
        let session = match self.token_grant("password", body).await {
            Ok(session) => session,
            Err(AuthError::Rejected { status: 400 | 401, .. }) => {
                return Err(AuthError::InvalidCredentials)
            }
            Err(e) => return Err(e),
        };

        self.remember(Some(&session));
        self.hub.emit(SessionChange::signed_in(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if let Some(session) = self.held_session() {
            let resp = self
                .client
                .post(self.endpoint("logout"))
                .header("apikey", self.anon_key.expose_secret())
                .bearer_auth(session.access_token.expose_secret())
                .send()
                .await?;

            let status = resp.status();
            // 401/404: the token is already gone server-side
            if !status.is_success() && !matches!(status.as_u16(), 401 | 404) {
                let status = status.as_u16();
                let body: Value = resp.json().await.unwrap_or(Value::Null);
                return Err(AuthError::Rejected {
                    status,
                    message: error_message(&body, status),
                });
            }
        }

        self.remember(None);
        self.hub.emit(SessionChange::signed_out());
        Ok(())
    }
}
