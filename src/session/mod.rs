//! Per-connection session state.
//!
//! A [`Session`] is created when a transport connection appears and destroyed
//! when it goes away. It carries the lifecycle state checked by the
//! dispatcher, a bounded notification channel drained by the transport, an
//! optional private tool table and an optional pinned credential scope.

mod registry;

pub use registry::{DEFAULT_MAX_SESSIONS, SessionRegistry};

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backend::CredentialScope;
use crate::error::{DispatchError, NotifyError};
use crate::tools::ToolTable;

/// Capacity of each session's notification channel.
pub const NOTIFICATION_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Server-initiated message for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The tool surface visible to the session changed.
    ToolListChanged,
    Message { severity: Severity, text: String },
}

impl Notification {
    pub fn info(text: impl Into<String>) -> Self {
        Self::Message {
            severity: Severity::Info,
            text: text.into(),
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::Message {
            severity: Severity::Warning,
            text: text.into(),
        }
    }
}

/// Lifecycle state. `Created -> Initialized -> Active -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Created = 0,
    Initialized = 1,
    Active = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Initialized,
            2 => Self::Active,
            _ => Self::Closed,
        }
    }
}

pub struct Session {
    id: String,
    state: AtomicU8,
    created_at: DateTime<Utc>,
    sender: mpsc::Sender<Notification>,
    receiver: Mutex<Option<mpsc::Receiver<Notification>>>,
    tools: RwLock<Option<Arc<ToolTable>>>,
    scope: RwLock<CredentialScope>,
    closed: CancellationToken,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let (sender, receiver) = mpsc::channel(NOTIFICATION_CAPACITY);
        Self {
            id: id.into(),
            state: AtomicU8::new(SessionState::Created as u8),
            created_at: Utc::now(),
            sender,
            receiver: Mutex::new(Some(receiver)),
            tools: RwLock::new(None),
            scope: RwLock::new(CredentialScope::default()),
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Complete the handshake. Repeating it is harmless; it never moves a
    /// session backwards.
    pub fn initialize(&self) -> Result<(), DispatchError> {
        match self.state.compare_exchange(
            SessionState::Created as u8,
            SessionState::Initialized as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(current) if SessionState::from_u8(current) == SessionState::Closed => {
                Err(DispatchError::SessionClosed(self.id.clone()))
            }
            Err(_) => Ok(()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state(), SessionState::Initialized | SessionState::Active)
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Record that a call is running on this session.
    pub fn mark_active(&self) -> Result<(), DispatchError> {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                match SessionState::from_u8(current) {
                    SessionState::Initialized | SessionState::Active => Some(SessionState::Active as u8),
                    SessionState::Created | SessionState::Closed => None,
                }
            })
            .map(|_| ())
            .map_err(|current| match SessionState::from_u8(current) {
                SessionState::Closed => DispatchError::SessionClosed(self.id.clone()),
                _ => DispatchError::NotInitialized(self.id.clone()),
            })
    }

    /// Move to `Closed`. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        let previous = self.state.swap(SessionState::Closed as u8, Ordering::AcqRel);
        if SessionState::from_u8(previous) == SessionState::Closed {
            return false;
        }
        self.closed.cancel();
        debug!(session = %self.id, "session closed");
        true
    }

    /// Fires once the session is closed.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Queue a notification without waiting. A full channel drops it.
    pub fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        if self.is_closed() {
            return Err(NotifyError::Closed);
        }
        self.sender.try_send(notification).map_err(|e| match e {
            TrySendError::Full(_) => NotifyError::Full,
            TrySendError::Closed(_) => NotifyError::Closed,
        })
    }

    /// Hand the receiving end to the transport forwarder. Only the first
    /// caller gets it.
    pub fn take_notifications(&self) -> Option<mpsc::Receiver<Notification>> {
        match self.receiver.lock() {
            Ok(mut receiver) => receiver.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// The session's private tool table, if one was set.
    pub async fn tools(&self) -> Option<Arc<ToolTable>> {
        self.tools.read().await.clone()
    }

    /// Replace (or clear) the private tool table and tell the client.
    pub async fn set_tools(&self, tools: Option<Arc<ToolTable>>) {
        *self.tools.write().await = tools;
        if let Err(e) = self.notify(Notification::ToolListChanged) {
            debug!(session = %self.id, error = %e, "tool list change not delivered");
        }
    }

    pub async fn scope(&self) -> CredentialScope {
        self.scope.read().await.clone()
    }

    /// Pin connection-level credentials used by calls that carry none.
    pub async fn pin_scope(&self, scope: CredentialScope) {
        *self.scope.write().await = scope;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("created_at", &self.created_at)
            .finish()
    }
}
