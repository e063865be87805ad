//! Subscription registry: rate name → live client sessions.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tokio::sync::{mpsc, watch};
use tracing::debug;
use uuid::Uuid;

/// Outcome of a subscribe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Added,
    /// Already subscribed; idempotent, no duplicate delivery.
    Duplicate,
}

struct SessionEntry {
    tx: mpsc::Sender<String>,
    kill: watch::Sender<bool>,
}

/// Concurrent registry mapping rate names to subscribed sessions.
///
/// Entries are created on first subscribe and pruned when their last
/// session unsubscribes or disconnects. Lock scopes are short and never
/// held across I/O, so the broadcast path can run on the tick-processing
/// task without blocking it on slow clients.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: RwLock<HashMap<String, HashSet<Uuid>>>,
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session's outbound queue and kill switch.
    pub fn register_session(
        &self,
        session: Uuid,
        tx: mpsc::Sender<String>,
        kill: watch::Sender<bool>,
    ) {
        self.sessions
            .write()
            .expect("registry lock is not poisoned")
            .insert(session, SessionEntry { tx, kill });
    }

    /// Subscribe a session to a rate name. Idempotent per session.
    pub fn subscribe(&self, name: &str, session: Uuid) -> SubscribeOutcome {
        let mut subscriptions = self
            .subscriptions
            .write()
            .expect("registry lock is not poisoned");
        if subscriptions.entry(name.to_owned()).or_default().insert(session) {
            SubscribeOutcome::Added
        } else {
            SubscribeOutcome::Duplicate
        }
    }

    /// Unsubscribe a session; false when it was not subscribed.
    pub fn unsubscribe(&self, name: &str, session: Uuid) -> bool {
        let mut subscriptions = self
            .subscriptions
            .write()
            .expect("registry lock is not poisoned");
        let Some(sessions) = subscriptions.get_mut(name) else {
            return false;
        };
        let removed = sessions.remove(&session);
        if sessions.is_empty() {
            subscriptions.remove(name);
        }
        removed
    }

    /// Remove a session everywhere: kill switch, session table, every
    /// subscription set (pruning emptied entries).
    pub fn drop_session(&self, session: Uuid) {
        if let Some(entry) = self
            .sessions
            .write()
            .expect("registry lock is not poisoned")
            .remove(&session)
        {
            let _ = entry.kill.send(true);
        }

        let mut subscriptions = self
            .subscriptions
            .write()
            .expect("registry lock is not poisoned");
        subscriptions.retain(|_, sessions| {
            sessions.remove(&session);
            !sessions.is_empty()
        });
    }

    /// Deliver one serialized rate line to every session subscribed to
    /// `name`. A session whose queue is full or closed is treated as
    /// broken and cleaned up without affecting the others.
    pub fn broadcast(&self, name: &str, line: &str) {
        let targets: Vec<Uuid> = {
            let subscriptions = self
                .subscriptions
                .read()
                .expect("registry lock is not poisoned");
            match subscriptions.get(name) {
                Some(sessions) => sessions.iter().copied().collect(),
                None => return,
            }
        };

        let mut dead: Vec<Uuid> = Vec::new();
        {
            let sessions = self
                .sessions
                .read()
                .expect("registry lock is not poisoned");
            for session in targets {
                let Some(entry) = sessions.get(&session) else {
                    dead.push(session);
                    continue;
                };
                if entry.tx.try_send(line.to_owned()).is_err() {
                    debug!(%session, name, "session queue unavailable, scheduling cleanup");
                    dead.push(session);
                }
            }
        }

        for session in dead {
            self.drop_session(session);
        }
    }

    /// Number of sessions subscribed to a name.
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.subscriptions
            .read()
            .expect("registry lock is not poisoned")
            .get(name)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .expect("registry lock is not poisoned")
            .len()
    }

    /// Whether a rate name has at least one subscriber entry.
    pub fn has_entry(&self, name: &str) -> bool {
        self.subscriptions
            .read()
            .expect("registry lock is not poisoned")
            .contains_key(name)
    }
}
