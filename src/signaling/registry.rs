//! Session registry: one live session per remote peer.

use std::collections::HashMap;

use tokio::sync::Mutex as AsyncMutex;

use super::session::{Role, SignalingSession};

use std::sync::Arc;

pub type SharedSession = Arc<AsyncMutex<SignalingSession>>;

struct SessionEntry {
    role: Role,
    session: SharedSession,
}

/// Owns every live session, keyed by remote peer id. Lookups never hold a
/// session lock; teardown of a replaced session happens after the map lock is
/// released.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: AsyncMutex<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the session for `peer_id`, creating one with `role` if absent.
    /// A role mismatch means the stored session is stale; it is replaced and
    /// the old one torn down. The bool is true when the caller got a fresh
    /// session and owns starting its negotiation.
    pub async fn get_or_create(&self, peer_id: &str, role: Role) -> (SharedSession, bool) {
        let (session, replaced) = {
            let mut sessions = self.sessions.lock().await;
            if let Some(entry) = sessions.get(peer_id) {
                if entry.role == role {
                    return (Arc::clone(&entry.session), false);
                }
            }
            let session = Arc::new(AsyncMutex::new(SignalingSession::new(peer_id, role)));
            let previous = sessions.insert(
                peer_id.to_string(),
                SessionEntry {
                    role,
                    session: Arc::clone(&session),
                },
            );
            (session, previous)
        };
        // Map lock is dropped before awaiting the stale session.
        if let Some(entry) = replaced {
            tracing::info!(target = "signaling", peer_id = %peer_id, "replacing stale session");
            entry.session.lock().await.teardown().await;
        }
        (session, true)
    }

    pub async fn get(&self, peer_id: &str) -> Option<SharedSession> {
        let sessions = self.sessions.lock().await;
        sessions.get(peer_id).map(|entry| Arc::clone(&entry.session))
    }

    pub async fn contains(&self, peer_id: &str) -> bool {
        self.sessions.lock().await.contains_key(peer_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Remove and tear down the session for `peer_id`. Returns false when no
    /// session was registered.
    pub async fn remove(&self, peer_id: &str) -> bool {
        let entry = self.sessions.lock().await.remove(peer_id);
        match entry {
            Some(entry) => {
                entry.session.lock().await.teardown().await;
                true
            }
            None => false,
        }
    }

    /// Tear down every live session, e.g. when the channel stream ends.
    pub async fn remove_all(&self) {
        let drained: Vec<SessionEntry> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            entry.session.lock().await.teardown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mock::MockConnector;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn one_session_per_peer() {
        let registry = SessionRegistry::new();
        let (first, fresh_first) = registry.get_or_create("peer", Role::Offerer).await;
        let (second, fresh_second) = registry.get_or_create("peer", Role::Offerer).await;

        assert!(fresh_first);
        assert!(!fresh_second);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn role_mismatch_replaces_and_tears_down() {
        let connector = MockConnector::new();
        let registry = SessionRegistry::new();

        let (session, _) = registry.get_or_create("peer", Role::Offerer).await;
        let (events, _rx) = mpsc::unbounded_channel();
        session
            .lock()
            .await
            .start_as_offerer(connector.as_ref(), events)
            .await
            .unwrap();

        let (replacement, fresh) = registry.get_or_create("peer", Role::Answerer).await;
        assert!(fresh);
        assert!(!Arc::ptr_eq(&session, &replacement));
        assert_eq!(connector.close_count(), 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn remove_unknown_peer_is_a_noop() {
        let registry = SessionRegistry::new();
        assert!(!registry.remove("ghost").await);
    }

    #[tokio::test]
    async fn remove_all_clears_every_session() {
        let registry = SessionRegistry::new();
        registry.get_or_create("a", Role::Offerer).await;
        registry.get_or_create("b", Role::Answerer).await;

        registry.remove_all().await;
        assert!(registry.is_empty().await);
    }
}
