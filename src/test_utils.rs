use crate::error::AuthError;
use crate::session::store::{SessionHub, SessionStore, SessionSubscription, SubscriptionHandle};
use crate::session::{Credentials, Session, SessionChange, UserIdentity};
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub fn admin_session() -> Session {
    Session::new(
        "admin-token",
        UserIdentity::new("u-admin", "admin@compliancehub.com"),
    )
}

pub fn user_session(email: &str) -> Session {
    Session::new(format!("token-{}", email), UserIdentity::new("u-user", email))
}

#[derive(Clone)]
enum ProbeScript {
    Session(Option<Session>),
    Error(String),
}

/// Scriptable in-process auth service.
pub struct MockSessionStore {
    hub: SessionHub,
    probe: Mutex<ProbeScript>,
    gate: Option<Arc<Notify>>,
    accounts: Mutex<HashMap<String, (String, UserIdentity)>>,
    current: Mutex<Option<Session>>,
    emit_changes: AtomicBool,
    fail_sign_out: AtomicBool,
    probes: AtomicUsize,
    unsubscribes: AtomicUsize,
}

impl Default for MockSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSessionStore {
    pub fn new() -> Self {
        Self {
            hub: SessionHub::new(),
            probe: Mutex::new(ProbeScript::Session(None)),
            gate: None,
            accounts: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            emit_changes: AtomicBool::new(true),
            fail_sign_out: AtomicBool::new(false),
            probes: AtomicUsize::new(0),
            unsubscribes: AtomicUsize::new(0),
        }
    }

    /// A store whose probe waits until the returned gate is notified.
    pub fn gated() -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let mut store = Self::new();
        store.gate = Some(gate.clone());
        (store, gate)
    }

    pub fn with_probe_session(self, session: Session) -> Self {
        self.set_probe_session(Some(session));
        self
    }

    pub fn with_probe_error(self, message: &str) -> Self {
        *self.probe.lock().expect("probe lock") = ProbeScript::Error(message.to_string());
        self
    }

    pub fn with_account(self, email: &str, password: &str, user_id: &str) -> Self {
        self.accounts.lock().expect("accounts lock").insert(
            email.to_string(),
            (password.to_string(), UserIdentity::new(user_id, email)),
        );
        self
    }

    /// Stop emitting changes from sign-in/sign-out.
    pub fn silent(self) -> Self {
        self.emit_changes.store(false, Ordering::SeqCst);
        self
    }

    pub fn failing_sign_out(self) -> Self {
        self.fail_sign_out.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_probe_session(&self, session: Option<Session>) {
        *self.probe.lock().expect("probe lock") = ProbeScript::Session(session);
    }

    pub fn emit(&self, change: SessionChange) -> u64 {
        self.hub.emit(change)
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Yield until the probe has been issued at least once.
    pub async fn probe_started(&self) {
        for _ in 0..1000 {
            if self.probe_count() > 0 {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("probe was never issued");
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    pub fn current(&self) -> Option<Session> {
        self.current.lock().expect("current lock").clone()
    }
}

#[async_trait::async_trait]
impl SessionStore for MockSessionStore {
    async fn probe_current_session(&self) -> Result<SessionChange, AuthError> {
        let version = self.hub.current_version();
        let script = self.probe.lock().expect("probe lock").clone();
        self.probes.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        match script {
            ProbeScript::Session(session) => {
                Ok(SessionChange::initial(session).with_version(version))
            }
            ProbeScript::Error(message) => Err(AuthError::Network(message)),
        }
    }

    fn subscribe(&self) -> SessionSubscription {
        self.hub.subscribe()
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.hub.unsubscribe(handle);
    }

    async fn sign_in_with_password(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        let identity = {
            let accounts = self.accounts.lock().expect("accounts lock");
            match accounts.get(&credentials.email) {
                Some((password, identity)) if password == credentials.password.expose_secret() => {
                    identity.clone()
                }
                _ => return Err(AuthError::InvalidCredentials),
            }
        };

        let session = Session::new(format!("token-{}", uuid::Uuid::new_v4()), identity);
        *self.current.lock().expect("current lock") = Some(session.clone());
        self.set_probe_session(Some(session.clone()));
        if self.emit_changes.load(Ordering::SeqCst) {
            self.hub.emit(SessionChange::signed_in(session.clone()));
        }
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(AuthError::Network("connection reset".to_string()));
        }
        *self.current.lock().expect("current lock") = None;
        self.set_probe_session(None);
        if self.emit_changes.load(Ordering::SeqCst) {
            self.hub.emit(SessionChange::signed_out());
        }
        Ok(())
    }
}
