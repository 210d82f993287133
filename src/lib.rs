// Core modules
mod config;
mod dispatch;
mod error;
pub mod api;
pub mod backend;
pub mod identity;
pub mod session;
pub mod tools;
pub mod server;

#[cfg(test)]
mod testing;

// Re-export key types and functions
pub use config::{ServerSettings, expand_env_vars, resolve_kubeconfig_path};
pub use dispatch::{Dispatcher, ToolCall};
pub use error::{
    BackendError, ComposeError, DispatchError, NotifyError, ReloadError, ResolveError, SessionError,
};
pub use server::{AppContext, McpServer, start_mcp_http};
pub use tools::{ToolArea, ToolHandler, ToolTable, TransportMode};

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use backend::{BackendConnector, ClientFactory, KubeConnector};
use identity::{ConfigWatcher, IdentityBuilder, IdentityStore, ServerIdentity};
use session::SessionRegistry;

/// Everything a transport needs: shared state plus the kubeconfig watcher.
pub struct App {
    pub ctx: AppContext,
    pub watcher: Arc<ConfigWatcher>,
}

/// Build the server state for `transport`.
///
/// The tool surface is composed once up front so a duplicate tool name
/// aborts startup. The default identity is loaded synchronously; if the
/// kubeconfig is missing or unusable the server still starts and only
/// credential-scoped calls work until the watcher sees a valid file.
pub async fn create_app(settings: &ServerSettings, transport: TransportMode) -> Result<App> {
    let areas = settings.areas()?;
    let options = settings.compose_options(transport);
    let surface = tools::compose(&areas, &options)?;
    info!(tools = surface.len(), transport = ?transport, "composed tool surface");

    let connector: Arc<dyn BackendConnector> =
        Arc::new(KubeConnector::new().with_context(settings.context.clone()));
    let builder = IdentityBuilder::new(connector.clone(), areas, options);

    let identity = Arc::new(IdentityStore::new(ServerIdentity::empty()));
    let sessions = Arc::new(SessionRegistry::with_capacity(settings.max_sessions));

    let watcher = ConfigWatcher::new(settings.kubeconfig_path()?, identity.clone(), builder.clone())
        .with_interval(settings.reload_interval())
        .with_sessions(sessions.clone());
    if watcher.load_initial().await.is_err() {
        info!(path = %watcher.path().display(), "starting without a default cluster identity");
    }

    let factory = ClientFactory::new(connector).with_verification(settings.verify_credentials());
    let dispatcher = Dispatcher::new(identity.clone(), factory);

    Ok(App {
        ctx: AppContext {
            identity,
            sessions,
            dispatcher,
            builder,
        },
        watcher: Arc::new(watcher),
    })
}
