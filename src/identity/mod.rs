//! The process-wide default identity.
//!
//! A [`ServerIdentity`] bundles the default cluster client with the tool
//! table composed for it. It is immutable; a reload builds a brand-new value
//! and swaps it in through [`IdentityStore::publish`], so a reader that loaded
//! a snapshot keeps a consistent (client, tools) pair for as long as it holds
//! it.

mod watcher;

pub use watcher::{ConfigWatcher, DEFAULT_RELOAD_INTERVAL, Fingerprint, ReloadOutcome};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use kube::config::Kubeconfig;

use crate::backend::{Backend, BackendConnector};
use crate::error::ReloadError;
use crate::tools::{ComposeOptions, ToolArea, ToolTable, compose};

/// Context names found in the kubeconfig the default client was built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSummary {
    pub contexts: Vec<String>,
    pub current_context: Option<String>,
}

impl ContextSummary {
    /// Best-effort summary; unparsable input yields an empty summary.
    pub fn from_yaml(raw: &str) -> Self {
        match Kubeconfig::from_yaml(raw) {
            Ok(kubeconfig) => Self {
                contexts: kubeconfig.contexts.into_iter().map(|c| c.name).collect(),
                current_context: kubeconfig.current_context,
            },
            Err(_) => Self::default(),
        }
    }
}

/// One immutable generation of the default backend configuration.
pub struct ServerIdentity {
    version: u64,
    fingerprint: Option<Fingerprint>,
    client: Option<Arc<dyn Backend>>,
    tools: Arc<ToolTable>,
    contexts: ContextSummary,
    loaded_at: DateTime<Utc>,
}

impl ServerIdentity {
    pub fn new(
        version: u64,
        fingerprint: Option<Fingerprint>,
        client: Option<Arc<dyn Backend>>,
        tools: Arc<ToolTable>,
        contexts: ContextSummary,
    ) -> Self {
        Self {
            version,
            fingerprint,
            client,
            tools,
            contexts,
            loaded_at: Utc::now(),
        }
    }

    /// Identity with no default client and no tools.
    pub fn empty() -> Self {
        Self::new(0, None, None, Arc::new(ToolTable::default()), ContextSummary::default())
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    pub fn client(&self) -> Option<&Arc<dyn Backend>> {
        self.client.as_ref()
    }

    pub fn tools(&self) -> &Arc<ToolTable> {
        &self.tools
    }

    pub fn contexts(&self) -> &ContextSummary {
        &self.contexts
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

impl std::fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerIdentity")
            .field("version", &self.version)
            .field("endpoint", &self.client.as_ref().map(|c| c.endpoint().to_string()))
            .field("tools", &self.tools.len())
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

/// Holder of the current [`ServerIdentity`].
pub struct IdentityStore {
    current: ArcSwap<ServerIdentity>,
    next_version: AtomicU64,
}

impl IdentityStore {
    pub fn new(initial: ServerIdentity) -> Self {
        let next = initial.version() + 1;
        Self {
            current: ArcSwap::from_pointee(initial),
            next_version: AtomicU64::new(next),
        }
    }

    /// Snapshot of the current identity. Hold on to it for the whole call.
    pub fn load(&self) -> Arc<ServerIdentity> {
        self.current.load_full()
    }

    /// Version number to stamp on the next identity.
    pub fn allocate_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::AcqRel)
    }

    /// Replace the current identity wholesale, returning the previous one.
    pub fn publish(&self, identity: ServerIdentity) -> Arc<ServerIdentity> {
        self.current.swap(Arc::new(identity))
    }
}

/// Rebuilds a [`ServerIdentity`] from kubeconfig text.
#[derive(Clone)]
pub struct IdentityBuilder {
    connector: Arc<dyn BackendConnector>,
    areas: Vec<ToolArea>,
    options: ComposeOptions,
}

impl IdentityBuilder {
    pub fn new(
        connector: Arc<dyn BackendConnector>,
        areas: Vec<ToolArea>,
        options: ComposeOptions,
    ) -> Self {
        Self {
            connector,
            areas,
            options,
        }
    }

    pub fn areas(&self) -> &[ToolArea] {
        &self.areas
    }

    pub fn options(&self) -> &ComposeOptions {
        &self.options
    }

    /// Compose the tool table this builder would publish.
    pub fn compose_tools(&self) -> Result<ToolTable, ReloadError> {
        Ok(compose(&self.areas, &self.options)?)
    }

    /// Build a complete identity. Both the client and the tool table must
    /// succeed; nothing is published on failure.
    pub async fn build(
        &self,
        version: u64,
        raw: &str,
        fingerprint: Fingerprint,
    ) -> Result<ServerIdentity, ReloadError> {
        let tools = self.compose_tools()?;
        let client = self.connector.from_kubeconfig(raw).await?;
        Ok(ServerIdentity::new(
            version,
            Some(fingerprint),
            Some(client),
            Arc::new(tools),
            ContextSummary::from_yaml(raw),
        ))
    }

    /// Identity used when no valid configuration has loaded yet: tools are
    /// exposed, but calls without credentials fail to resolve a client.
    pub fn build_clientless(&self, fingerprint: Option<Fingerprint>) -> Result<ServerIdentity, ReloadError> {
        let tools = self.compose_tools()?;
        Ok(ServerIdentity::new(
            0,
            fingerprint,
            None,
            Arc::new(tools),
            ContextSummary::default(),
        ))
    }
}
