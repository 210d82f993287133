//! DashMap-backed registry of live sessions.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Notification, Session};
use crate::error::SessionError;

pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// Live sessions keyed by id.
///
/// Uses an atomic counter for capacity enforcement so the limit check and the
/// insert cannot race. All operations are synchronous so `destroy` can run
/// from a `Drop` impl.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    count: AtomicUsize,
    max_sessions: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_SESSIONS)
    }

    pub fn with_capacity(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            count: AtomicUsize::new(0),
            max_sessions,
        }
    }

    /// Register a new session under `id`.
    pub fn create(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        if !self.try_reserve() {
            warn!(max = self.max_sessions, "session registry at capacity, rejecting session");
            return Err(SessionError::CapacityExceeded(self.max_sessions));
        }
        match self.sessions.entry(id.to_string()) {
            Entry::Occupied(_) => {
                self.count.fetch_sub(1, Ordering::AcqRel);
                Err(SessionError::AlreadyExists(id.to_string()))
            }
            Entry::Vacant(slot) => {
                let session = Arc::new(Session::new(id));
                slot.insert(session.clone());
                debug!(session = %id, "session created");
                Ok(session)
            }
        }
    }

    /// Register a session under a fresh UUID.
    pub fn open(&self) -> Result<Arc<Session>, SessionError> {
        self.create(&Uuid::new_v4().to_string())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| s.clone())
    }

    /// Remove and close a session. In-flight calls holding the `Arc` finish
    /// on their own.
    pub fn destroy(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| {
            self.count.fetch_sub(1, Ordering::AcqRel);
            session.close();
            debug!(session = %id, "session destroyed");
            session
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Send `notification` to every live session without blocking. Returns
    /// how many sessions accepted it.
    pub fn broadcast(&self, notification: Notification) -> usize {
        let sessions: Vec<Arc<Session>> = self.sessions.iter().map(|e| e.value().clone()).collect();
        sessions
            .iter()
            .filter(|session| match session.notify(notification.clone()) {
                Ok(()) => true,
                Err(e) => {
                    debug!(session = %session.id(), error = %e, "notification dropped");
                    false
                }
            })
            .count()
    }

    /// CAS loop: increment the counter only if it is below the limit.
    fn try_reserve(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.max_sessions).then_some(current + 1)
            })
            .is_ok()
    }
}
