//! Hot reload of the default identity.
//!
//! The watcher polls the kubeconfig file, fingerprints it, and on any change
//! rebuilds the default client and tool table together. A failed rebuild is
//! logged and contained here; the previous identity stays current.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{IdentityBuilder, IdentityStore};
use crate::error::ReloadError;
use crate::session::{Notification, SessionRegistry};

pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(5);

/// Identity of one observed state of the configuration source.
#[derive(Clone, PartialEq, Eq)]
pub enum Fingerprint {
    Missing,
    Present {
        digest: [u8; 32],
        len: u64,
        modified: Option<SystemTime>,
    },
}

impl Fingerprint {
    pub fn of_bytes(bytes: &[u8], modified: Option<SystemTime>) -> Self {
        Self::Present {
            digest: Sha256::digest(bytes).into(),
            len: bytes.len() as u64,
            modified,
        }
    }

    /// Short hex form of the content digest, for logs.
    pub fn short(&self) -> String {
        match self {
            Self::Missing => "missing".to_string(),
            Self::Present { digest, .. } => digest[..6].iter().map(|b| format!("{b:02x}")).collect(),
        }
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "Fingerprint(missing)"),
            Self::Present { len, .. } => write!(f, "Fingerprint({}, {} bytes)", self.short(), len),
        }
    }
}

/// Result of a single poll.
#[derive(Debug)]
pub enum ReloadOutcome {
    Unchanged,
    Reloaded { version: u64, previous: u64 },
    Failed(ReloadError),
}

/// Read the file and fingerprint it. A missing file is not an error here.
async fn observe(path: &Path) -> Result<(Fingerprint, Option<String>), ReloadError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let modified = tokio::fs::metadata(path)
                .await
                .ok()
                .and_then(|m| m.modified().ok());
            let fingerprint = Fingerprint::of_bytes(&bytes, modified);
            let text = String::from_utf8_lossy(&bytes).into_owned();
            Ok((fingerprint, Some(text)))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok((Fingerprint::Missing, None)),
        Err(source) => Err(ReloadError::Read {
            path: path.display().to_string(),
            source,
        }),
    }
}

pub struct ConfigWatcher {
    path: PathBuf,
    interval: Duration,
    store: Arc<IdentityStore>,
    builder: IdentityBuilder,
    sessions: Option<Arc<SessionRegistry>>,
    last_seen: Mutex<Option<Fingerprint>>,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>, store: Arc<IdentityStore>, builder: IdentityBuilder) -> Self {
        let last_seen = store.load().fingerprint().cloned();
        Self {
            path: path.into(),
            interval: DEFAULT_RELOAD_INTERVAL,
            store,
            builder,
            sessions: None,
            last_seen: Mutex::new(last_seen),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sessions to notify with `tools/list_changed` after a reload.
    pub fn with_sessions(mut self, sessions: Arc<SessionRegistry>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build the first identity synchronously at startup.
    ///
    /// Unlike a reload there is nothing to fall back to, so a failure yields a
    /// client-less identity (tools listed, credential-less calls rejected) and
    /// the watcher keeps polling for a usable file.
    pub async fn load_initial(&self) -> Result<u64, ReloadError> {
        let mut last = self.last_seen.lock().await;
        let (fingerprint, built) = match observe(&self.path).await {
            Ok((fingerprint, Some(raw))) => {
                *last = Some(fingerprint.clone());
                let version = self.store.allocate_version();
                let built = self.builder.build(version, &raw, fingerprint.clone()).await;
                (Some(fingerprint), built)
            }
            Ok((fingerprint, None)) => {
                *last = Some(fingerprint.clone());
                let missing = ReloadError::Missing(self.path.display().to_string());
                (Some(fingerprint), Err(missing))
            }
            // Unreadable: nothing recorded, so the next poll retries.
            Err(e) => (None, Err(e)),
        };

        match built {
            Ok(identity) => {
                let version = identity.version();
                self.store.publish(identity);
                info!(path = %self.path.display(), version, "loaded default cluster identity");
                Ok(version)
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "no usable default cluster identity; only credential-scoped calls will work"
                );
                let identity = self.builder.build_clientless(fingerprint)?;
                self.store.publish(identity);
                Err(e)
            }
        }
    }

    /// Poll once and reload if the fingerprint changed.
    ///
    /// Polls are serialized: the fingerprint lock is held for the whole
    /// rebuild, so identities are published in the order changes are seen.
    pub async fn check_once(&self) -> ReloadOutcome {
        let (fingerprint, contents) = match observe(&self.path).await {
            Ok(observed) => observed,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "could not read configuration source");
                return ReloadOutcome::Failed(e);
            }
        };

        let mut last = self.last_seen.lock().await;
        if last.as_ref() == Some(&fingerprint) {
            return ReloadOutcome::Unchanged;
        }
        debug!(
            path = %self.path.display(),
            from = %last.as_ref().map(Fingerprint::short).unwrap_or_default(),
            to = %fingerprint.short(),
            "configuration source changed"
        );
        // Recorded before the rebuild so a broken file is not retried every tick.
        *last = Some(fingerprint.clone());

        let current = self.store.load().version();
        let Some(raw) = contents else {
            let err = ReloadError::Missing(self.path.display().to_string());
            warn!(error = %err, version = current, "keeping current cluster identity");
            return ReloadOutcome::Failed(err);
        };

        let version = self.store.allocate_version();
        match self.builder.build(version, &raw, fingerprint).await {
            Ok(identity) => {
                let tools = identity.tools().len();
                let previous = self.store.publish(identity).version();
                info!(version, previous, tools, "reloaded default cluster identity");
                if let Some(sessions) = &self.sessions {
                    let delivered = sessions.broadcast(Notification::ToolListChanged);
                    debug!(delivered, "broadcast tool list change");
                }
                ReloadOutcome::Reloaded { version, previous }
            }
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    error = %e,
                    version = current,
                    "reload failed; keeping current cluster identity"
                );
                ReloadOutcome::Failed(e)
            }
        }
    }

    /// Poll until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(path = %self.path.display(), interval_ms = self.interval.as_millis() as u64, "watching configuration source");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("configuration watcher stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.check_once().await;
                }
            }
        }
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}
