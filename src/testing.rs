//! Fakes and fixtures shared by the unit and integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use futures::future::BoxFuture;
use rmcp::model::{CallToolResult, JsonObject};
use serde_json::{Value, json};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, BackendConnector, CredentialScope, ResourceRef};
use crate::error::{BackendError, BackendResult, ResolveError};
use crate::identity::{ContextSummary, IdentityBuilder, ServerIdentity};
use crate::tools::{ComposeOptions, ToolArea, ToolContext, ToolHandler, ToolTable, compose};

pub const VALID_KUBECONFIG: &str = r#"apiVersion: v1
kind: Config
clusters:
- name: dev
  cluster:
    server: https://dev.example:6443
- name: prod
  cluster:
    server: https://prod.example:6443
users:
- name: admin
  user:
    token: dev-token
contexts:
- name: dev
  context:
    cluster: dev
    user: admin
- name: prod
  context:
    cluster: prod
    user: admin
current-context: dev
"#;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory [`Backend`] with failure injection and close accounting.
#[derive(Default)]
pub struct FakeBackend {
    endpoint: String,
    objects: Mutex<HashMap<String, Vec<Value>>>,
    proxy: Mutex<Vec<(String, String)>>,
    closed: AtomicBool,
    close_count: AtomicUsize,
    call_count: AtomicUsize,
    fail_requests: AtomicBool,
    reject_probes: AtomicBool,
    hang_probes: AtomicBool,
}

impl FakeBackend {
    pub fn new(endpoint: &str) -> Arc<Self> {
        Arc::new(Self {
            endpoint: endpoint.to_string(),
            ..Default::default()
        })
    }

    pub fn insert(&self, plural: &str, object: Value) {
        lock(&self.objects).entry(plural.to_string()).or_default().push(object);
    }

    pub fn object_count(&self, plural: &str) -> usize {
        lock(&self.objects).get(plural).map_or(0, Vec::len)
    }

    pub fn set_proxy_response(&self, prefix: &str, body: &str) {
        lock(&self.proxy).push((prefix.to_string(), body.to_string()));
    }

    pub fn fail_requests(&self) {
        self.fail_requests.store(true, Ordering::SeqCst);
    }

    pub fn reject_probes(&self) {
        self.reject_probes.store(true, Ordering::SeqCst);
    }

    pub fn hang_probes(&self) {
        self.hang_probes.store(true, Ordering::SeqCst);
    }

    /// How many times `close()` was called.
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    /// How many resource operations reached this backend.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn enter(&self) -> BackendResult<()> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Released);
        }
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(BackendError::Request("injected failure".to_string()));
        }
        Ok(())
    }

    fn matches(object: &Value, resource: &ResourceRef, namespace: Option<&str>) -> bool {
        match (resource.namespaced, namespace) {
            (true, Some(ns)) => object.pointer("/metadata/namespace").and_then(Value::as_str) == Some(ns),
            _ => true,
        }
    }

    fn selected(object: &Value, selector: Option<&str>) -> bool {
        let Some(selector) = selector else {
            return true;
        };
        selector.split(',').filter(|s| !s.is_empty()).all(|term| {
            let Some((key, value)) = term.split_once('=') else {
                return false;
            };
            object
                .pointer("/metadata/labels")
                .and_then(|labels| labels.get(key.trim()))
                .and_then(Value::as_str)
                == Some(value.trim())
        })
    }

    fn named(object: &Value, name: &str) -> bool {
        object.pointer("/metadata/name").and_then(Value::as_str) == Some(name)
    }
}

impl Backend for FakeBackend {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn list<'a>(
        &'a self,
        resource: &'a ResourceRef,
        namespace: Option<&'a str>,
        label_selector: Option<&'a str>,
    ) -> BoxFuture<'a, BackendResult<Vec<Value>>> {
        Box::pin(async move {
            self.enter()?;
            let objects = lock(&self.objects);
            Ok(objects
                .get(resource.plural)
                .map(|items| {
                    items
                        .iter()
                        .filter(|o| Self::matches(o, resource, namespace))
                        .filter(|o| Self::selected(o, label_selector))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    fn get<'a>(
        &'a self,
        resource: &'a ResourceRef,
        namespace: Option<&'a str>,
        name: &'a str,
    ) -> BoxFuture<'a, BackendResult<Value>> {
        Box::pin(async move {
            self.enter()?;
            lock(&self.objects)
                .get(resource.plural)
                .and_then(|items| {
                    items
                        .iter()
                        .find(|o| Self::matches(o, resource, namespace) && Self::named(o, name))
                        .cloned()
                })
                .ok_or_else(|| BackendError::NotFound {
                    kind: resource.kind.to_string(),
                    name: name.to_string(),
                })
        })
    }

    fn delete<'a>(
        &'a self,
        resource: &'a ResourceRef,
        namespace: Option<&'a str>,
        name: &'a str,
    ) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            self.enter()?;
            let mut objects = lock(&self.objects);
            let items = objects.entry(resource.plural.to_string()).or_default();
            let before = items.len();
            items.retain(|o| !(Self::matches(o, resource, namespace) && Self::named(o, name)));
            if items.len() == before {
                return Err(BackendError::NotFound {
                    kind: resource.kind.to_string(),
                    name: name.to_string(),
                });
            }
            Ok(())
        })
    }

    fn proxy_get<'a>(&'a self, path: &'a str) -> BoxFuture<'a, BackendResult<String>> {
        Box::pin(async move {
            self.enter()?;
            lock(&self.proxy)
                .iter()
                .find(|(prefix, _)| path.starts_with(prefix.as_str()))
                .map(|(_, body)| body.clone())
                .ok_or_else(|| BackendError::NotFound {
                    kind: "proxy".to_string(),
                    name: path.to_string(),
                })
        })
    }

    fn probe(&self) -> BoxFuture<'_, BackendResult<String>> {
        Box::pin(async move {
            if self.hang_probes.load(Ordering::SeqCst) {
                futures::future::pending::<()>().await;
            }
            if self.closed.load(Ordering::SeqCst) {
                return Err(BackendError::Released);
            }
            if self.reject_probes.load(Ordering::SeqCst) {
                return Err(BackendError::Unauthorized);
            }
            Ok("v1.33.0-fake".to_string())
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.close_count.fetch_add(1, Ordering::SeqCst);
    }
}

type Seed = Arc<dyn Fn(&FakeBackend) + Send + Sync>;

/// [`BackendConnector`] building [`FakeBackend`]s.
///
/// Kubeconfig text containing `invalid` fails to load; otherwise the endpoint
/// is taken from the first `server:` line.
#[derive(Default)]
pub struct FakeConnector {
    rejected_tokens: Mutex<Vec<String>>,
    hang_probes: AtomicBool,
    scoped_builds: AtomicUsize,
    built: Mutex<Vec<Arc<FakeBackend>>>,
    defaults: Mutex<Vec<Arc<FakeBackend>>>,
    seed: Mutex<Option<Seed>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Scoped clients built with this token fail their probe as unauthorized.
    pub fn reject_token(&self, token: &str) {
        lock(&self.rejected_tokens).push(token.to_string());
    }

    /// Scoped clients never answer their probe.
    pub fn hang_probes(&self) {
        self.hang_probes.store(true, Ordering::SeqCst);
    }

    /// Run `seed` on every backend this connector builds.
    pub fn seed_with(&self, seed: impl Fn(&FakeBackend) + Send + Sync + 'static) {
        *lock(&self.seed) = Some(Arc::new(seed));
    }

    pub fn scoped_builds(&self) -> usize {
        self.scoped_builds.load(Ordering::SeqCst)
    }

    /// Call-scoped backends, in build order.
    pub fn built_backends(&self) -> Vec<Arc<FakeBackend>> {
        lock(&self.built).clone()
    }

    /// Default-identity backends, in build order.
    pub fn default_backends(&self) -> Vec<Arc<FakeBackend>> {
        lock(&self.defaults).clone()
    }

    fn seeded(&self, endpoint: &str) -> Arc<FakeBackend> {
        let backend = FakeBackend::new(endpoint);
        if let Some(seed) = lock(&self.seed).clone() {
            seed(&backend);
        }
        backend
    }
}

impl BackendConnector for FakeConnector {
    fn from_kubeconfig<'a>(&'a self, raw: &'a str) -> BoxFuture<'a, Result<Arc<dyn Backend>, ResolveError>> {
        Box::pin(async move {
            if raw.contains("invalid") {
                return Err(ResolveError::Config("unparsable kubeconfig".to_string()));
            }
            let endpoint = raw
                .lines()
                .find_map(|line| line.trim().strip_prefix("server:"))
                .map(str::trim)
                .unwrap_or("https://default");
            let backend = self.seeded(endpoint);
            lock(&self.defaults).push(backend.clone());
            Ok(backend as Arc<dyn Backend>)
        })
    }

    fn from_scope<'a>(&'a self, scope: &'a CredentialScope) -> BoxFuture<'a, Result<Arc<dyn Backend>, ResolveError>> {
        Box::pin(async move {
            self.scoped_builds.fetch_add(1, Ordering::SeqCst);
            let backend = self.seeded(scope.endpoint().unwrap_or_default());
            if let Some(token) = scope.token() {
                if lock(&self.rejected_tokens).iter().any(|t| t == token) {
                    backend.reject_probes();
                }
            }
            if self.hang_probes.load(Ordering::SeqCst) {
                backend.hang_probes();
            }
            lock(&self.built).push(backend.clone());
            Ok(backend as Arc<dyn Backend>)
        })
    }
}

enum Script {
    Succeed,
    Fail(String),
    Panic,
    Gate { started: Arc<Notify>, proceed: Arc<Notify> },
    Hang,
}

/// A tool whose behavior is fixed at construction.
///
/// A successful run reports the endpoint and identity version it saw plus the
/// arguments it received.
pub struct ScriptedTool {
    name: String,
    script: Script,
    calls: AtomicUsize,
    seen_endpoints: Mutex<Vec<String>>,
}

impl ScriptedTool {
    fn with_script(name: &str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script,
            calls: AtomicUsize::new(0),
            seen_endpoints: Mutex::new(Vec::new()),
        })
    }

    pub fn ok(name: &str) -> Arc<Self> {
        Self::with_script(name, Script::Succeed)
    }

    pub fn failing(name: &str, message: &str) -> Arc<Self> {
        Self::with_script(name, Script::Fail(message.to_string()))
    }

    pub fn panicking(name: &str) -> Arc<Self> {
        Self::with_script(name, Script::Panic)
    }

    /// Never completes; only cancellation ends the call.
    pub fn hanging(name: &str) -> Arc<Self> {
        Self::with_script(name, Script::Hang)
    }

    /// Signals `started`, then waits for `proceed` before succeeding.
    pub fn gated(name: &str, started: Arc<Notify>, proceed: Arc<Notify>) -> Arc<Self> {
        Self::with_script(name, Script::Gate { started, proceed })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_endpoints(&self) -> Vec<String> {
        lock(&self.seen_endpoints).clone()
    }

    fn report(&self, args: &JsonObject, ctx: &ToolContext) -> CallToolResult {
        crate::tools::json_result(&json!({
            "tool": self.name,
            "endpoint": ctx.client.endpoint(),
            "identity_version": ctx.identity.version(),
            "namespace": ctx.namespace,
            "session": ctx.session_id,
            "args": args,
        }))
    }
}

impl ToolHandler for ScriptedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "scripted test tool"
    }

    fn input_schema(&self) -> JsonObject {
        json!({ "type": "object", "properties": {} }).as_object().cloned().unwrap_or_default()
    }

    fn execute<'a>(&'a self, args: JsonObject, ctx: &'a ToolContext) -> BoxFuture<'a, Result<CallToolResult>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            lock(&self.seen_endpoints).push(ctx.client.endpoint().to_string());
            match &self.script {
                Script::Succeed => Ok(self.report(&args, ctx)),
                Script::Fail(message) => Err(anyhow!("{message}")),
                Script::Panic => panic!("scripted panic in {}", self.name),
                Script::Gate { started, proceed } => {
                    started.notify_one();
                    proceed.notified().await;
                    Ok(self.report(&args, ctx))
                }
                Script::Hang => {
                    futures::future::pending::<()>().await;
                    Ok(self.report(&args, ctx))
                }
            }
        })
    }
}

/// Table with every built-in area, default options.
pub fn default_tools() -> ToolTable {
    compose(&ToolArea::ALL, &ComposeOptions::default()).unwrap_or_default()
}

/// Identity at version 1 whose default client is `client`.
pub fn identity_with_client(client: Arc<dyn Backend>) -> ServerIdentity {
    ServerIdentity::new(
        1,
        None,
        Some(client),
        Arc::new(default_tools()),
        ContextSummary::from_yaml(VALID_KUBECONFIG),
    )
}

/// Identity with an explicit list of scripted tools.
pub fn identity_with_tools(
    version: u64,
    client: Option<Arc<dyn Backend>>,
    tools: Vec<Arc<ScriptedTool>>,
) -> ServerIdentity {
    let mut table = ToolTable::new();
    for tool in tools {
        if let Err(e) = table.insert(ToolArea::Kubernetes, tool) {
            panic!("fixture tool table: {e}");
        }
    }
    ServerIdentity::new(version, None, client, Arc::new(table), ContextSummary::default())
}

pub fn builder(connector: Arc<FakeConnector>) -> IdentityBuilder {
    IdentityBuilder::new(connector, ToolArea::ALL.to_vec(), ComposeOptions::default())
}

pub fn tool_context(backend: Arc<FakeBackend>) -> ToolContext {
    let client: Arc<dyn Backend> = backend;
    ToolContext {
        client: client.clone(),
        identity: Arc::new(identity_with_client(client)),
        namespace: None,
        session_id: None,
        cancel: CancellationToken::new(),
    }
}

/// Text of the first content block.
pub fn result_text(result: &CallToolResult) -> String {
    result
        .content
        .first()
        .and_then(|c| c.as_text())
        .map(|t| t.text.clone())
        .unwrap_or_default()
}

/// First content block parsed as JSON.
pub fn result_json(result: &CallToolResult) -> Value {
    serde_json::from_str(&result_text(result)).unwrap_or(Value::Null)
}
