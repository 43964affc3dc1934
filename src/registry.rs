//! Session registry
//!
//! Process-wide table mapping a session key (one per user) to its live
//! [`ChatSession`]. The registry is an explicit object rather than a global,
//! so tests and multi-registry setups stay trivial.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::Config;
use crate::compaction::ContextCompactor;
use crate::error::{CoachError, Result};
use crate::service::CompletionService;
use crate::session::{ChatSession, ConversationStats};

/// Registry of live sessions, keyed by an opaque user identifier.
///
/// Map mutation is atomic with respect to presence checks: a key can never be
/// silently overwritten by `create_session`, and `end_session` removes the
/// key in the same critical section that ends the session.
pub struct SessionRegistry {
    service: Arc<dyn CompletionService>,
    compactor: ContextCompactor,
    sessions: RwLock<HashMap<String, Arc<ChatSession>>>,
}

impl SessionRegistry {
    /// Create a registry with the default compaction policy.
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self::with_config(service, Config::default())
    }

    /// Create a registry with custom compaction thresholds.
    pub fn with_config(service: Arc<dyn CompletionService>, config: Config) -> Self {
        Self {
            service,
            compactor: ContextCompactor {
                max_messages: config.max_messages,
                max_tokens: config.max_tokens,
                recent_window: config.recent_window,
            },
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<ChatSession>>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<ChatSession>>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a new session for `key`.
    ///
    /// Fails with [`CoachError::SessionAlreadyActive`] if the key already has
    /// a live session; an in-progress conversation is never overwritten.
    pub fn create_session(&self, key: impl Into<String>) -> Result<Arc<ChatSession>> {
        let key = key.into();
        let mut sessions = self.write();
        if sessions.contains_key(&key) {
            return Err(CoachError::SessionAlreadyActive(key));
        }
        let session = Arc::new(ChatSession::new(
            key.clone(),
            Arc::clone(&self.service),
            self.compactor.clone(),
        ));
        sessions.insert(key.clone(), Arc::clone(&session));
        info!(key = %key, "created session");
        Ok(session)
    }

    /// Look up the live session for `key`.
    pub fn get_session(&self, key: &str) -> Result<Arc<ChatSession>> {
        self.read()
            .get(key)
            .cloned()
            .ok_or_else(|| CoachError::SessionNotFound(key.to_string()))
    }

    /// End the session for `key` and remove it from the registry.
    ///
    /// The key stays registered if ending fails (already ended elsewhere, or
    /// a completion call still in flight), so the error is observable.
    pub fn end_session(&self, key: &str) -> Result<ConversationStats> {
        let mut sessions = self.write();
        let session = sessions
            .get(key)
            .ok_or_else(|| CoachError::SessionNotFound(key.to_string()))?;
        let stats = session.end()?;
        sessions.remove(key);
        debug!(key = %key, "removed ended session");
        Ok(stats)
    }

    /// Snapshot of the currently registered keys, in no particular order.
    pub fn list_active_sessions(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }
}
