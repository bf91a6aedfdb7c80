//! The single current tunnel session

use rsocks_mux::MuxSession;
use std::sync::{Arc, PoisonError, RwLock};

/// Holds the tunnel session new clients are routed onto
///
/// At most one session is current. Readers always get a complete
/// `Arc<MuxSession>` snapshot; a client keeps using the session it was handed
/// even if a newer one is published meanwhile.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    current: Arc<RwLock<Option<Arc<MuxSession>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `session` current, returning the one it replaces
    ///
    /// The previous session is not drained or closed; its streams keep
    /// running until they finish or its transport goes away.
    pub fn publish(&self, session: Arc<MuxSession>) -> Option<Arc<MuxSession>> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        current.replace(session)
    }

    /// Snapshot of the current session, if any
    pub fn current(&self) -> Option<Arc<MuxSession>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Clear `session` if it is still the current one
    ///
    /// Returns `false` when another session has been published since.
    pub fn retire(&self, session: &Arc<MuxSession>) -> bool {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            Some(active) if Arc::ptr_eq(active, session) => {
                *current = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_established(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("established", &self.is_established())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Arc<MuxSession> {
        let (a, _b) = tokio::io::duplex(1024);
        Arc::new(MuxSession::client(a))
    }

    #[tokio::test]
    async fn test_publish_returns_previous() {
        let registry = SessionRegistry::new();
        assert!(registry.current().is_none());
        assert!(!registry.is_established());

        let first = session();
        let second = session();

        assert!(registry.publish(first.clone()).is_none());
        assert!(registry.is_established());

        let replaced = registry.publish(second.clone()).unwrap();
        assert!(Arc::ptr_eq(&replaced, &first));
        assert!(Arc::ptr_eq(&registry.current().unwrap(), &second));
    }

    #[tokio::test]
    async fn test_retire_only_clears_current() {
        let registry = SessionRegistry::new();
        let first = session();
        let second = session();

        registry.publish(first.clone());
        registry.publish(second.clone());

        // A superseded session must not clear its replacement
        assert!(!registry.retire(&first));
        assert!(registry.is_established());

        assert!(registry.retire(&second));
        assert!(!registry.is_established());
        assert!(!registry.retire(&second));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publish_and_read() {
        let registry = SessionRegistry::new();
        let sessions: Vec<Arc<MuxSession>> = (0..8).map(|_| session()).collect();

        let mut handles = Vec::new();
        for session in sessions.iter().cloned() {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    registry.publish(session.clone());
                    tokio::task::yield_now().await;
                }
            }));
        }
        for _ in 0..4 {
            let registry = registry.clone();
            let sessions = sessions.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..200 {
                    if let Some(current) = registry.current() {
                        assert!(sessions.iter().any(|s| Arc::ptr_eq(s, &current)));
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert!(registry.is_established());
    }
}
