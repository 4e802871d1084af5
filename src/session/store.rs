//! The auth service as seen by the client: a trait for the operations we
//! consume, and a fan-out helper that implementations use to deliver change
//! notifications to subscribers.

use super::{Credentials, Session, SessionChange};
use crate::error::AuthError;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Identifies one registered subscription, for release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// A live subscription. Changes arrive on `events` in emission order.
#[derive(Debug)]
pub struct SessionSubscription {
    pub handle: SubscriptionHandle,
    pub events: mpsc::UnboundedReceiver<SessionChange>,
}

/// Operations consumed from the hosted auth service.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Look up the session currently held by the store. Resolves to an
    /// `InitialSession` change stamped with the store's version at the time
    /// of the lookup.
    async fn probe_current_session(&self) -> Result<SessionChange, AuthError>;

    /// Register for change notifications.
    fn subscribe(&self) -> SessionSubscription;

    /// Release a subscription. Unknown handles are ignored.
    fn unsubscribe(&self, handle: SubscriptionHandle);

    /// Password sign-in. On success the store also emits a `SignedIn` change.
    async fn sign_in_with_password(&self, credentials: &Credentials) -> Result<Session, AuthError>;

    /// Sign out. On success the store also emits a `SignedOut` change.
    async fn sign_out(&self) -> Result<(), AuthError>;
}

/// Subscriber registry with a monotonic version counter.
#[derive(Debug, Default)]
pub struct SessionHub {
    subscribers: DashMap<u64, mpsc::UnboundedSender<SessionChange>>,
    next_id: AtomicU64,
    version: AtomicU64,
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> SessionSubscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(id, tx);
        SessionSubscription {
            handle: SubscriptionHandle(id),
            events: rx,
        }
    }

    /// Returns true if the handle was registered.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.subscribers.remove(&handle.0).is_some()
    }

    /// Version of the most recent emission (0 before any).
    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Stamp a change with the next version and deliver it to every subscriber.
    /// Subscribers whose receiver is gone are dropped.
    pub fn emit(&self, change: SessionChange) -> u64 {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let change = change.with_version(version);

        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            if entry.value().send(change.clone()).is_err() {
                closed.push(*entry.key());
            }
        }
        for id in closed {
            self.subscribers.remove(&id);
        }

        tracing::debug!(kind = %change.kind, version, "session change emitted");
        version
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
