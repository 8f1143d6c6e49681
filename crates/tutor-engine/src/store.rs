//! Session store contract and an in-memory implementation.
//!
//! The store is the single source of truth for sessions. The engine never
//! keeps a session across requests; it reads, applies one operation, and
//! writes back with the version it read.

use std::collections::HashMap;

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use crate::error::{Result, TutorError};
use crate::session::{SessionId, TutorSession};

/// Durable storage for session records.
pub trait SessionStore: Send + Sync {
    /// Inserts a new session. Fails if the id is already taken.
    fn create(&self, session: TutorSession) -> BoxFuture<'_, Result<TutorSession>>;

    /// Fetches a session by id.
    fn get(&self, id: SessionId) -> BoxFuture<'_, Result<Option<TutorSession>>>;

    /// Replaces a session if its stored version still equals `expected_version`.
    ///
    /// On success the stored record carries `expected_version + 1` and is
    /// returned. On a version mismatch nothing is written and
    /// `TutorError::SessionConflict` is returned.
    fn update(
        &self,
        session: TutorSession,
        expected_version: u64,
    ) -> BoxFuture<'_, Result<TutorSession>>;
}

/// Process-local store backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, TutorSession>>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Returns `true` if no session is stored.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl SessionStore for InMemorySessionStore {
    fn create(&self, mut session: TutorSession) -> BoxFuture<'_, Result<TutorSession>> {
        Box::pin(async move {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(&session.id) {
                return Err(TutorError::session_conflict(session.id));
            }
            session.version = 0;
            sessions.insert(session.id, session.clone());
            Ok(session)
        })
    }

    fn get(&self, id: SessionId) -> BoxFuture<'_, Result<Option<TutorSession>>> {
        Box::pin(async move { Ok(self.sessions.read().await.get(&id).cloned()) })
    }

    fn update(
        &self,
        mut session: TutorSession,
        expected_version: u64,
    ) -> BoxFuture<'_, Result<TutorSession>> {
        Box::pin(async move {
            let mut sessions = self.sessions.write().await;
            let stored = sessions
                .get_mut(&session.id)
                .ok_or_else(|| TutorError::session_not_found(session.id))?;

            if stored.version != expected_version {
                tracing::warn!(
                    session_id = %session.id,
                    expected_version,
                    stored_version = stored.version,
                    "Rejected stale session write"
                );
                return Err(TutorError::session_conflict(session.id));
            }

            session.version = expected_version + 1;
            *stored = session.clone();
            Ok(session)
        })
    }
}
