//! `kube`-backed implementation of [`Backend`] and [`BackendConnector`].

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use futures::future::BoxFuture;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{Backend, BackendConnector, CredentialScope, ResourceRef};
use crate::error::{BackendError, BackendResult, ResolveError};

const SCOPED_CONTEXT: &str = "call-scoped";

/// A live cluster client.
///
/// The inner client is held in an `ArcSwapOption` so `close()` can drop the
/// connection pool while other clones of the `Arc<KubeBackend>` still exist;
/// any later operation fails with [`BackendError::Released`].
pub struct KubeBackend {
    endpoint: String,
    client: ArcSwapOption<Client>,
}

impl KubeBackend {
    pub fn new(client: Client, endpoint: String) -> Self {
        Self {
            endpoint,
            client: ArcSwapOption::from_pointee(client),
        }
    }

    fn client(&self) -> BackendResult<Client> {
        self.client
            .load_full()
            .map(|c| c.as_ref().clone())
            .ok_or(BackendError::Released)
    }

    fn api(&self, resource: &ResourceRef, namespace: Option<&str>) -> BackendResult<Api<DynamicObject>> {
        let client = self.client()?;
        let ar = api_resource(resource);
        Ok(match (resource.namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(client, ns, &ar),
            (true, None) => Api::default_namespaced_with(client, &ar),
            (false, _) => Api::all_with(client, &ar),
        })
    }
}

fn api_resource(resource: &ResourceRef) -> ApiResource {
    ApiResource {
        group: resource.group.to_string(),
        version: resource.version.to_string(),
        api_version: resource.api_version(),
        kind: resource.kind.to_string(),
        plural: resource.plural.to_string(),
    }
}

fn map_kube_error(err: kube::Error, kind: &str, name: &str) -> BackendError {
    match err {
        kube::Error::Api(resp) if resp.code == 401 => BackendError::Unauthorized,
        kube::Error::Api(resp) if resp.code == 404 => BackendError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        other => BackendError::Request(other.to_string()),
    }
}

fn to_value(obj: DynamicObject) -> BackendResult<Value> {
    serde_json::to_value(obj).map_err(|e| BackendError::Request(e.to_string()))
}

impl Backend for KubeBackend {
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
            let client = self.client()?;
            let ar = api_resource(resource);
            let api: Api<DynamicObject> = match (resource.namespaced, namespace) {
                (true, Some(ns)) => Api::namespaced_with(client, ns, &ar),
                _ => Api::all_with(client, &ar),
            };

            let mut params = ListParams::default();
            if let Some(selector) = label_selector {
                params = params.labels(selector);
            }

            let list = api
                .list(&params)
                .await
                .map_err(|e| map_kube_error(e, resource.kind, resource.plural))?;
            list.items.into_iter().map(to_value).collect()
        })
    }

    fn get<'a>(
        &'a self,
        resource: &'a ResourceRef,
        namespace: Option<&'a str>,
        name: &'a str,
    ) -> BoxFuture<'a, BackendResult<Value>> {
        Box::pin(async move {
            let api = self.api(resource, namespace)?;
            let obj = api
                .get(name)
                .await
                .map_err(|e| map_kube_error(e, resource.kind, name))?;
            to_value(obj)
        })
    }

    fn delete<'a>(
        &'a self,
        resource: &'a ResourceRef,
        namespace: Option<&'a str>,
        name: &'a str,
    ) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            let api = self.api(resource, namespace)?;
            api.delete(name, &DeleteParams::default())
                .await
                .map_err(|e| map_kube_error(e, resource.kind, name))?;
            Ok(())
        })
    }

    fn proxy_get<'a>(&'a self, path: &'a str) -> BoxFuture<'a, BackendResult<String>> {
        Box::pin(async move {
            let client = self.client()?;
            let request = http::Request::get(path)
                .body(Vec::new())
                .map_err(|e| BackendError::Request(e.to_string()))?;
            client
                .request_text(request)
                .await
                .map_err(|e| map_kube_error(e, "proxy", path))
        })
    }

    fn probe(&self) -> BoxFuture<'_, BackendResult<String>> {
        Box::pin(async move {
            let client = self.client()?;
            let info = client
                .apiserver_version()
                .await
                .map_err(|e| map_kube_error(e, "version", "apiserver"))?;
            Ok(info.git_version)
        })
    }

    fn close(&self) {
        if self.client.swap(None).is_some() {
            debug!(endpoint = %self.endpoint, "closed cluster client");
        }
    }
}

/// Builds [`KubeBackend`] clients from kubeconfig text or a credential scope.
#[derive(Debug, Clone)]
pub struct KubeConnector {
    context: Option<String>,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl Default for KubeConnector {
    fn default() -> Self {
        Self {
            context: None,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
        }
    }
}

impl KubeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific kubeconfig context instead of `current-context`.
    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    async fn connect(
        &self,
        kubeconfig: Kubeconfig,
        options: &KubeConfigOptions,
    ) -> Result<Arc<dyn Backend>, ResolveError> {
        let mut config = Config::from_custom_kubeconfig(kubeconfig, options)
            .await
            .map_err(|e| ResolveError::Config(e.to_string()))?;
        config.connect_timeout = Some(self.connect_timeout);
        config.read_timeout = Some(self.read_timeout);

        let endpoint = config.cluster_url.to_string();
        let client = Client::try_from(config).map_err(|e| ResolveError::Config(e.to_string()))?;
        Ok(Arc::new(KubeBackend::new(client, endpoint)))
    }
}

/// Render a single-context kubeconfig for an explicit endpoint and token so
/// scoped clients go through the same loader as the default identity.
fn scoped_kubeconfig(scope: &CredentialScope) -> Result<Kubeconfig, ResolveError> {
    let mut context = json!({ "cluster": SCOPED_CONTEXT, "user": SCOPED_CONTEXT });
    if let Some(ns) = scope.namespace() {
        context["namespace"] = json!(ns);
    }

    let doc = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": SCOPED_CONTEXT, "cluster": { "server": scope.endpoint() } }],
        "users": [{ "name": SCOPED_CONTEXT, "user": { "token": scope.token() } }],
        "contexts": [{ "name": SCOPED_CONTEXT, "context": context }],
        "current-context": SCOPED_CONTEXT,
    });

    serde_json::from_value(doc)
        .map_err(|_| ResolveError::Config("could not build a client configuration for the scope".to_string()))
}

impl BackendConnector for KubeConnector {
    fn from_kubeconfig<'a>(
        &'a self,
        raw: &'a str,
    ) -> BoxFuture<'a, Result<Arc<dyn Backend>, ResolveError>> {
        Box::pin(async move {
            let kubeconfig =
                Kubeconfig::from_yaml(raw).map_err(|e| ResolveError::Config(e.to_string()))?;
            let options = KubeConfigOptions {
                context: self.context.clone(),
                ..Default::default()
            };
            let backend = self.connect(kubeconfig, &options).await?;
            info!(endpoint = %backend.endpoint(), "built default cluster client");
            Ok(backend)
        })
    }

    fn from_scope<'a>(
        &'a self,
        scope: &'a CredentialScope,
    ) -> BoxFuture<'a, Result<Arc<dyn Backend>, ResolveError>> {
        Box::pin(async move {
            let kubeconfig = scoped_kubeconfig(scope)?;
            self.connect(kubeconfig, &KubeConfigOptions::default()).await
        })
    }
}
