//! MCP server implementation using rmcp.
//!
//! One [`McpServer`] exists per transport connection (the stdio pipe, or one
//! streamable-HTTP session). It owns a [`Session`] in the shared registry for
//! as long as any clone of it is alive.

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use rmcp::{
    ErrorData as McpError,
    handler::server::ServerHandler,
    model::*,
    service::{NotificationContext, Peer, RequestContext, RoleServer},
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::CredentialScope;
use crate::dispatch::{Dispatcher, ToolCall};
use crate::error::{ComposeError, SessionError};
use crate::identity::{IdentityBuilder, IdentityStore};
use crate::session::{Notification, Session, SessionRegistry, Severity};
use crate::tools::{ToolArea, TransportMode, compose, parse_areas};

/// Type alias for HTTP request parts stored in rmcp extensions.
type HttpParts = http::request::Parts;

/// Header selecting a private tool surface for the session (`k8s,helm`).
pub const HEADER_TOOLSETS: &str = "x-mcp-toolsets";

/// Shared state behind every connection.
#[derive(Clone)]
pub struct AppContext {
    pub identity: Arc<IdentityStore>,
    pub sessions: Arc<SessionRegistry>,
    pub dispatcher: Dispatcher,
    pub builder: IdentityBuilder,
}

impl AppContext {
    pub fn transport(&self) -> TransportMode {
        self.builder.options().transport
    }
}

/// Destroys the session when the last server clone goes away.
struct SessionLease {
    sessions: Arc<SessionRegistry>,
    session: Arc<Session>,
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.sessions.destroy(self.session.id());
    }
}

/// MCP server that handles protocol requests and delegates tool calls to the
/// [`Dispatcher`].
#[derive(Clone)]
pub struct McpServer {
    ctx: AppContext,
    lease: Arc<SessionLease>,
}

impl McpServer {
    /// Register a new session and build the server for it.
    pub fn connect(ctx: AppContext) -> Result<Self, SessionError> {
        let session = ctx.sessions.open()?;
        info!(session = %session.id(), transport = ?ctx.transport(), "MCP session opened");
        Ok(Self {
            lease: Arc::new(SessionLease {
                sessions: ctx.sessions.clone(),
                session,
            }),
            ctx,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.lease.session
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// Apply connection-level headers: a pinned credential scope and an
    /// optional private tool surface.
    async fn apply_headers(&self, parts: &HttpParts) -> Result<(), McpError> {
        let session = self.session();

        let scope = CredentialScope::from_headers(&parts.headers);
        if !scope.is_empty() {
            scope
                .validate()
                .map_err(|e| McpError::invalid_params(e.to_string(), None))?;
            info!(session = %session.id(), scope = ?scope, "pinned connection credentials");
            session.pin_scope(scope).await;
        }

        if let Some(toolsets) = parts
            .headers
            .get(HEADER_TOOLSETS)
            .and_then(|v| v.to_str().ok())
        {
            let areas = parse_areas(toolsets).map_err(|e| McpError::invalid_params(e.to_string(), None))?;
            if !areas.is_empty() {
                let table = private_table(&areas, &self.ctx.builder)
                    .map_err(|e| McpError::invalid_params(e.to_string(), None))?;
                debug!(session = %session.id(), tools = table.len(), "session uses a private tool table");
                session.set_tools(Some(Arc::new(table))).await;
            }
        }
        Ok(())
    }

    /// Forward queued session notifications to the peer until the session
    /// closes.
    fn spawn_forwarder(&self, peer: Peer<RoleServer>) {
        let session = self.session().clone();
        let Some(mut rx) = session.take_notifications() else {
            return;
        };
        let closed = session.closed_token();
        tokio::spawn(async move {
            loop {
                let notification = tokio::select! {
                    _ = closed.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(n) => n,
                        None => break,
                    },
                };
                let sent = match notification {
                    Notification::ToolListChanged => peer.notify_tool_list_changed().await,
                    Notification::Message { severity, text } => {
                        peer.notify_logging_message(LoggingMessageNotificationParam {
                            level: logging_level(severity),
                            logger: Some(env!("CARGO_PKG_NAME").to_string()),
                            data: json!(text),
                        })
                        .await
                    }
                };
                if let Err(e) = sent {
                    debug!(session = %session.id(), error = %e, "could not deliver notification");
                    break;
                }
            }
            debug!(session = %session.id(), "notification forwarder stopped");
        });
    }
}

fn private_table(areas: &[ToolArea], builder: &IdentityBuilder) -> Result<crate::tools::ToolTable, ComposeError> {
    compose(areas, builder.options())
}

fn logging_level(severity: Severity) -> LoggingLevel {
    match severity {
        Severity::Info => LoggingLevel::Info,
        Severity::Warning => LoggingLevel::Warning,
        Severity::Error => LoggingLevel::Error,
    }
}

impl ServerHandler for McpServer {
    fn ping(
        &self,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<(), McpError>> + Send + '_ {
        std::future::ready(Ok(()))
    }

    fn initialize(
        &self,
        _request: InitializeRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<InitializeResult, McpError>> + Send + '_ {
        let peer = context.peer.clone();
        let extensions = context.extensions.clone();

        async move {
            if let Some(parts) = extensions.get::<HttpParts>() {
                self.apply_headers(parts).await?;
            }

            self.session()
                .initialize()
                .map_err(|e| e.to_mcp_error())?;
            self.spawn_forwarder(peer);
            info!(session = %self.session().id(), "MCP session initialized");

            Ok(self.get_info())
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        async move {
            let table = self
                .ctx
                .dispatcher
                .effective_tools(Some(self.session().as_ref()))
                .await;
            Ok(ListToolsResult {
                tools: table.list_tools(),
                next_cursor: None,
                ..Default::default()
            })
        }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        let call = ToolCall::new(request.name.to_string(), request.arguments);
        let cancel = context.ct.clone();

        async move {
            self.ctx
                .dispatcher
                .dispatch(call, Some(self.session().as_ref()), &cancel)
                .await
                .map_err(|e| e.to_mcp_error())
        }
    }

    fn on_cancelled(
        &self,
        _notification: CancelledNotificationParam,
        _context: NotificationContext<RoleServer>,
    ) -> impl Future<Output = ()> + Send + '_ {
        std::future::ready(())
    }

    fn on_initialized(
        &self,
        _context: NotificationContext<RoleServer>,
    ) -> impl Future<Output = ()> + Send + '_ {
        std::future::ready(())
    }

    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder()
                .enable_logging()
                .enable_tools()
                .enable_tool_list_changed()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Cluster management tools for Kubernetes, Argo CD, Helm, Prometheus and Istio. \
                 Calls use the server's kubeconfig unless they carry `cluster_server` and \
                 `cluster_token` arguments (or the connection pinned credentials)."
                    .to_string(),
            ),
        }
    }
}

/// Serve MCP over streamable HTTP at `/mcp`, plus the `/health` API, until
/// `cancel` fires.
pub async fn start_mcp_http(ctx: AppContext, bind: &str, cancel: CancellationToken) -> Result<()> {
    let service = StreamableHttpService::new(
        {
            let ctx = ctx.clone();
            move || McpServer::connect(ctx.clone()).map_err(std::io::Error::other)
        },
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let router = Router::new()
        .nest_service("/mcp", service)
        .merge(crate::api::create_router(ctx.clone()));
    let listener = tokio::net::TcpListener::bind(bind).await?;

    info!("MCP HTTP server listening on http://{}/mcp", bind);
    if ctx.identity.load().client().is_none() {
        warn!("no default cluster identity; calls must carry credentials");
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ClientFactory;
    use crate::testing::{FakeBackend, FakeConnector, builder, identity_with_client};
    use crate::tools::ComposeOptions;

    fn app_context(sessions: Arc<SessionRegistry>) -> AppContext {
        let connector = FakeConnector::new();
        let identity = Arc::new(IdentityStore::new(identity_with_client(FakeBackend::new("https://default"))));
        AppContext {
            dispatcher: Dispatcher::new(identity.clone(), ClientFactory::new(connector.clone())),
            identity,
            sessions,
            builder: builder(connector),
        }
    }

    fn parts(headers: &[(&str, &str)]) -> HttpParts {
        let mut request = http::Request::builder().uri("/mcp");
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        request.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_connect_registers_and_drop_destroys() {
        let sessions = Arc::new(SessionRegistry::new());
        let server = McpServer::connect(app_context(sessions.clone())).unwrap();
        let clone = server.clone();
        let id = server.session().id().to_string();
        assert!(sessions.get(&id).is_some());

        drop(server);
        assert!(sessions.get(&id).is_some());
        drop(clone);
        assert!(sessions.get(&id).is_none());
    }

    #[test]
    fn test_connect_respects_capacity() {
        let sessions = Arc::new(SessionRegistry::with_capacity(1));
        let _first = McpServer::connect(app_context(sessions.clone())).unwrap();
        assert!(matches!(
            McpServer::connect(app_context(sessions)),
            Err(SessionError::CapacityExceeded(1))
        ));
    }

    #[tokio::test]
    async fn test_headers_pin_scope_and_private_tools() {
        let sessions = Arc::new(SessionRegistry::new());
        let server = McpServer::connect(app_context(sessions)).unwrap();

        server
            .apply_headers(&parts(&[
                ("x-cluster-server", "https://cluster-b"),
                ("authorization", "Bearer t"),
                ("x-mcp-toolsets", "helm"),
            ]))
            .await
            .unwrap();

        let scope = server.session().scope().await;
        assert_eq!(scope.endpoint(), Some("https://cluster-b"));
        let tools = server.session().tools().await.unwrap();
        assert_eq!(tools.names(), vec!["helm_list_releases"]);
    }

    #[tokio::test]
    async fn test_headers_with_bad_toolset_are_rejected() {
        let server = McpServer::connect(app_context(Arc::new(SessionRegistry::new()))).unwrap();
        let err = server
            .apply_headers(&parts(&[("x-mcp-toolsets", "k8s,bogus")]))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
        assert!(server.session().tools().await.is_none());
    }

    #[tokio::test]
    async fn test_headers_without_token_are_rejected() {
        let server = McpServer::connect(app_context(Arc::new(SessionRegistry::new()))).unwrap();
        let err = server
            .apply_headers(&parts(&[("x-cluster-server", "https://cluster-b")]))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_headers_with_token_but_no_server_are_rejected() {
        let server = McpServer::connect(app_context(Arc::new(SessionRegistry::new()))).unwrap();
        let err = server
            .apply_headers(&parts(&[("authorization", "Bearer tenant-b")]))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
        assert!(!err.message.contains("tenant-b"));
        assert!(server.session().scope().await.is_empty());
    }

    #[test]
    fn test_private_table_honors_transport_filter() {
        let connector = FakeConnector::new();
        let http_builder = IdentityBuilder::new(
            connector,
            ToolArea::ALL.to_vec(),
            ComposeOptions {
                transport: TransportMode::Http,
                ..Default::default()
            },
        );
        let table = private_table(&[ToolArea::Kubernetes], &http_builder).unwrap();
        assert!(!table.contains("k8s_list_contexts"));
    }
}
