//! Process-wide mirror of the auth session.
//!
//! [`MirrorState`] is the single writer of the cached session, the derived admin
//! flag and the loading flag. Every update goes through one `watch` send, so a
//! reader never sees a session without the admin flag computed from it.
//! [`SessionMirror`] wires a `MirrorState` to a [`SessionStore`]: one probe at
//! start, one subscription for the rest of the process, and sign-in/sign-out
//! forwarded without touching the state directly.
//!
//! ```text
//!  Uninitialized ──start──▶ Loading ──first change──▶ Anonymous
//!                              │                      Authenticated
//!                              │                      AuthenticatedAdmin
//!                              └──probe error───────▶ ProbeFailed
//! ```

use super::admin::AdminPolicy;
use super::store::{SessionStore, SessionSubscription, SubscriptionHandle};
use super::{Credentials, Session, SessionChange};
use crate::error::AuthError;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Lifecycle phase of the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Loading,
    Anonymous,
    Authenticated,
    AuthenticatedAdmin,
    /// The start-up probe failed and no change has arrived since.
    /// Nobody is treated as signed in, but that is not confirmed.
    ProbeFailed,
}

impl Phase {
    fn settled(has_session: bool, is_admin: bool) -> Self {
        match (has_session, is_admin) {
            (false, _) => Phase::Anonymous,
            (true, false) => Phase::Authenticated,
            (true, true) => Phase::AuthenticatedAdmin,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Loading => "loading",
            Phase::Anonymous => "anonymous",
            Phase::Authenticated => "authenticated",
            Phase::AuthenticatedAdmin => "admin",
            Phase::ProbeFailed => "probe_failed",
        };
        write!(f, "{}", name)
    }
}

/// What every observer sees.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorSnapshot {
    pub phase: Phase,
    pub session: Option<Session>,
    pub is_admin: bool,
    /// Highest change version applied so far
    pub version: Option<u64>,
    /// Message from a failed start-up probe, while in `ProbeFailed`
    pub probe_error: Option<String>,
}

impl MirrorSnapshot {
    fn initial() -> Self {
        Self {
            phase: Phase::Uninitialized,
            session: None,
            is_admin: false,
            version: None,
            probe_error: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.phase, Phase::Uninitialized | Phase::Loading)
    }

    pub fn probe_failed(&self) -> bool {
        self.phase == Phase::ProbeFailed
    }

    pub fn email(&self) -> Option<&str> {
        self.session.as_ref().and_then(|s| s.email())
    }
}

/// Owned, observable session state.
pub struct MirrorState {
    tx: watch::Sender<MirrorSnapshot>,
    policy: AdminPolicy,
}

impl MirrorState {
    pub fn new(policy: AdminPolicy) -> Self {
        let (tx, _rx) = watch::channel(MirrorSnapshot::initial());
        Self { tx, policy }
    }

    pub fn policy(&self) -> &AdminPolicy {
        &self.policy
    }

    /// Move `Uninitialized` to `Loading`. No effect in any other phase.
    pub fn begin_loading(&self) {
        self.tx.send_if_modified(|state| {
            if state.phase == Phase::Uninitialized {
                state.phase = Phase::Loading;
                true
            } else {
                false
            }
        });
    }

    /// Apply a change. Returns false if the change was dropped because its
    /// version is older than one already applied.
    pub fn apply(&self, change: &SessionChange) -> bool {
        let mut accepted = false;
        self.tx.send_if_modified(|state| {
            if let (Some(incoming), Some(applied)) = (change.version, state.version) {
                if incoming < applied {
                    return false;
                }
            }
            accepted = true;

            let is_admin = self.policy.is_admin(change.session.as_ref());
            let next = MirrorSnapshot {
                phase: Phase::settled(change.session.is_some(), is_admin),
                session: change.session.clone(),
                is_admin,
                version: change.version.or(state.version),
                probe_error: None,
            };
            if *state == next {
                return false;
            }
            *state = next;
            true
        });

        if accepted {
            tracing::debug!(kind = %change.kind, version = ?change.version, "session change applied");
        } else {
            tracing::debug!(kind = %change.kind, version = ?change.version, "stale session change dropped");
        }
        accepted
    }

    /// Settle a still-loading mirror as `ProbeFailed`. Returns false if a
    /// change had already settled it.
    pub fn record_probe_failure(&self, err: &AuthError) -> bool {
        self.tx.send_if_modified(|state| {
            if !state.is_loading() {
                return false;
            }
            state.phase = Phase::ProbeFailed;
            state.session = None;
            state.is_admin = false;
            state.probe_error = Some(err.to_string());
            true
        })
    }

    pub fn snapshot(&self) -> MirrorSnapshot {
        self.tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<MirrorSnapshot> {
        self.tx.subscribe()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.tx.borrow().session.clone()
    }

    pub fn is_admin(&self) -> bool {
        self.tx.borrow().is_admin
    }

    pub fn is_loading(&self) -> bool {
        self.tx.borrow().is_loading()
    }

    pub fn phase(&self) -> Phase {
        self.tx.borrow().phase
    }
}

struct Listener {
    handle: SubscriptionHandle,
    task: JoinHandle<()>,
}

/// A [`MirrorState`] kept current from a [`SessionStore`].
pub struct SessionMirror {
    state: Arc<MirrorState>,
    store: Arc<dyn SessionStore>,
    listener: Mutex<Option<Listener>>,
    stopped: watch::Sender<bool>,
}

impl SessionMirror {
    /// Probe the store and subscribe to its changes. Must be called from
    /// within a tokio runtime.
    pub fn start(store: Arc<dyn SessionStore>, policy: AdminPolicy) -> Arc<Self> {
        let state = Arc::new(MirrorState::new(policy));
        state.begin_loading();

        let SessionSubscription { handle, events } = store.subscribe();
        let task = tokio::spawn(run_listener(state.clone(), store.clone(), events));

        Arc::new(Self {
            state,
            store,
            listener: Mutex::new(Some(Listener { handle, task })),
            stopped: watch::Sender::new(false),
        })
    }

    pub fn state(&self) -> &MirrorState {
        &self.state
    }

    pub fn snapshot(&self) -> MirrorSnapshot {
        self.state.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<MirrorSnapshot> {
        self.state.watch()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.state.current_session()
    }

    pub fn is_admin(&self) -> bool {
        self.state.is_admin()
    }

    pub fn is_loading(&self) -> bool {
        self.state.is_loading()
    }

    /// Wait until the initial probe (or the first change) has settled the mirror.
    /// Returns the current, possibly still loading, snapshot once the mirror
    /// has been shut down.
    pub async fn settled(&self) -> MirrorSnapshot {
        let mut rx = self.state.watch();
        let mut stopped = self.stopped.subscribe();
        let settled = tokio::select! {
            res = rx.wait_for(|s| !s.is_loading()) => res.ok().map(|s| s.clone()),
            _ = stopped.wait_for(|done| *done) => None,
        };
        settled.unwrap_or_else(|| self.state.snapshot())
    }

    /// Forward a password sign-in. The mirror updates when the store's
    /// change arrives, not when this returns.
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        tracing::info!(email = %credentials.email, "signing in");
        self.store.sign_in_with_password(credentials).await
    }

    /// Forward a sign-out. Same update discipline as [`SessionMirror::sign_in`].
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        tracing::info!("signing out");
        self.store.sign_out().await
    }

    /// Probe the store again and apply the result, e.g. after `ProbeFailed`.
    pub async fn reprobe(&self) -> Result<(), AuthError> {
        let change = self.store.probe_current_session().await?;
        self.state.apply(&change);
        Ok(())
    }

    /// Release the store subscription and stop the listener. Returns false
    /// if already shut down.
    pub fn shutdown(&self) -> bool {
        let listener = match self.listener.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match listener {
            Some(listener) => {
                self.store.unsubscribe(listener.handle);
                listener.task.abort();
                self.stopped.send_replace(true);
                tracing::debug!(subscription = listener.handle.id(), "session mirror shut down");
                true
            }
            None => false,
        }
    }
}

impl Drop for SessionMirror {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_listener(
    state: Arc<MirrorState>,
    store: Arc<dyn SessionStore>,
    mut events: mpsc::UnboundedReceiver<SessionChange>,
) {
    let probe = store.probe_current_session();
    tokio::pin!(probe);
    let mut probing = true;

    loop {
        tokio::select! {
            result = &mut probe, if probing => {
                probing = false;
                settle_probe(&state, result);
            }
            change = events.recv() => match change {
                Some(change) => {
                    state.apply(&change);
                }
                None => {
                    if probing {
                        settle_probe(&state, probe.await);
                    }
                    tracing::debug!("session store closed the subscription");
                    break;
                }
            }
        }
    }
}

fn settle_probe(state: &MirrorState, result: Result<SessionChange, AuthError>) {
    match result {
        Ok(change) => {
            state.apply(&change);
        }
        Err(e) => {
            tracing::warn!(error = %e, "initial session probe failed");
            state.record_probe_failure(&e);
        }
    }
}
