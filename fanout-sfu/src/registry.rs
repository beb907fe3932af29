//! Session registry
//!
//! Maps a session id to at most one publisher session and at most one viewer
//! session. Backed by sharded concurrent maps so lookups for different ids
//! never contend on a single lock.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info};

use crate::selection::{PublisherSelector, SelectionStrategy};
use crate::session::Session;
use crate::types::{SessionId, SessionRole};

#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Return the session for `id` and `role`, creating it if absent.
    /// Concurrent calls for a new id create exactly one session.
    fn lookup_or_create(&self, id: &SessionId, role: SessionRole) -> Arc<Session>;

    /// Read-only lookup; never creates
    fn lookup(&self, id: &SessionId, role: SessionRole) -> Option<Arc<Session>>;

    /// Tear down any existing session for `id` and `role` and insert a
    /// fresh one in state New
    async fn replace(&self, id: &SessionId, role: SessionRole) -> Arc<Session>;

    /// Remove the entry for `id` and `role` without tearing it down
    fn remove(&self, id: &SessionId, role: SessionRole) -> Option<Arc<Session>>;

    /// Remove `session` only if it is still the registered entry for its id
    fn evict(&self, session: &Arc<Session>) -> bool;

    /// Pick a Connected publisher that owns a forwarding sink
    async fn select_connected_publisher(&self) -> Option<Arc<Session>>;

    fn publishers(&self) -> Vec<Arc<Session>>;

    fn viewers(&self) -> Vec<Arc<Session>>;

    /// Tear down and drop every session
    async fn close_all(&self);
}

pub struct InMemoryRegistry {
    publishers: DashMap<SessionId, Arc<Session>>,
    viewers: DashMap<SessionId, Arc<Session>>,
    selector: PublisherSelector,
}

impl InMemoryRegistry {
    #[must_use]
    pub fn new(strategy: SelectionStrategy) -> Self {
        Self {
            publishers: DashMap::new(),
            viewers: DashMap::new(),
            selector: PublisherSelector::new(strategy),
        }
    }

    const fn map(&self, role: SessionRole) -> &DashMap<SessionId, Arc<Session>> {
        match role {
            SessionRole::Publisher => &self.publishers,
            SessionRole::Viewer => &self.viewers,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.publishers.len() + self.viewers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new(SelectionStrategy::default())
    }
}

#[async_trait]
impl SessionRegistry for InMemoryRegistry {
    fn lookup_or_create(&self, id: &SessionId, role: SessionRole) -> Arc<Session> {
        let entry = self
            .map(role)
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Session::new(id.clone(), role)));
        Arc::clone(entry.value())
    }

    fn lookup(&self, id: &SessionId, role: SessionRole) -> Option<Arc<Session>> {
        self.map(role).get(id).map(|entry| Arc::clone(entry.value()))
    }

    async fn replace(&self, id: &SessionId, role: SessionRole) -> Arc<Session> {
        let fresh = Arc::new(Session::new(id.clone(), role));
        let previous = self.map(role).insert(id.clone(), Arc::clone(&fresh));

        if let Some(previous) = previous {
            info!(
                session_id = %id,
                role = %role,
                "Replacing session on re-initiation"
            );
            previous.teardown().await;
        }
        fresh
    }

    fn remove(&self, id: &SessionId, role: SessionRole) -> Option<Arc<Session>> {
        self.map(role).remove(id).map(|(_, session)| session)
    }

    fn evict(&self, session: &Arc<Session>) -> bool {
        self.map(session.role())
            .remove_if(session.id(), |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    async fn select_connected_publisher(&self) -> Option<Arc<Session>> {
        let viewers = match self.selector.strategy() {
            SelectionStrategy::LeastLoaded => self.viewers(),
            _ => Vec::new(),
        };
        self.selector.select(self.publishers(), &viewers).await
    }

    fn publishers(&self) -> Vec<Arc<Session>> {
        self.publishers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn viewers(&self) -> Vec<Arc<Session>> {
        self.viewers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    async fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = self
            .publishers()
            .into_iter()
            .chain(self.viewers())
            .collect();
        self.publishers.clear();
        self.viewers.clear();

        let total = sessions.len();
        join_all(sessions.iter().map(|session| session.teardown())).await;
        debug!(total, "Closed all sessions");
    }
}
