//! Backend client resolution.
//!
//! A call either carries its own credentials (a [`CredentialScope`] with an
//! endpoint and token) or relies on the default client owned by the current
//! [`ServerIdentity`]. Scoped clients are built fresh for every call and are
//! never cached: two calls with different tokens may belong to different
//! tenants.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use rmcp::model::JsonObject;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::{Backend, BackendConnector};
use crate::error::{BackendError, ResolveError};
use crate::identity::ServerIdentity;

/// Reserved argument key carrying a per-call API server URL.
pub const ARG_SERVER: &str = "cluster_server";
/// Reserved argument key carrying a per-call bearer token.
pub const ARG_TOKEN: &str = "cluster_token";
/// Reserved argument key carrying a per-call namespace hint.
pub const ARG_NAMESPACE: &str = "cluster_namespace";

/// Header carrying a connection-scoped API server URL (HTTP transport).
pub const HEADER_SERVER: &str = "x-cluster-server";
/// Header carrying a connection-scoped namespace hint (HTTP transport).
pub const HEADER_NAMESPACE: &str = "x-cluster-namespace";

/// Call-supplied endpoint and credential.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialScope {
    endpoint: Option<String>,
    token: Option<String>,
    namespace: Option<String>,
}

impl fmt::Debug for CredentialScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialScope")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl CredentialScope {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            token: Some(token.into()),
            namespace: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// No endpoint and no token: use the default identity. A namespace alone
    /// is only a hint and does not make a scope.
    pub fn is_empty(&self) -> bool {
        self.endpoint.is_none() && self.token.is_none()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Remove the reserved credential keys from a tool's argument bag.
    ///
    /// The keys are stripped even when empty so handlers never see them.
    pub fn take_from_args(args: &mut JsonObject) -> Self {
        let mut take = |key: &str| {
            args.remove(key)
                .and_then(|v| v.as_str().map(str::trim).map(str::to_string))
                .filter(|s| !s.is_empty())
        };
        Self {
            endpoint: take(ARG_SERVER),
            token: take(ARG_TOKEN),
            namespace: take(ARG_NAMESPACE),
        }
    }

    /// Extract a connection-scoped credential from HTTP request headers.
    pub fn from_headers(headers: &http::HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let token = headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Self {
            endpoint: header(HEADER_SERVER),
            token,
            namespace: header(HEADER_NAMESPACE),
        }
    }

    /// Check the endpoint and token before any network I/O happens.
    pub fn validate(&self) -> Result<Url, ResolveError> {
        let Some(endpoint) = self.endpoint.as_deref() else {
            return Err(ResolveError::MissingEndpoint);
        };

        let url = Url::parse(endpoint).map_err(|e| ResolveError::InvalidEndpoint {
            endpoint: redact_endpoint(endpoint),
            reason: e.to_string(),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ResolveError::InvalidEndpoint {
                endpoint: redact_endpoint(endpoint),
                reason: format!("unsupported scheme `{}`", url.scheme()),
            });
        }
        if url.host_str().is_none() {
            return Err(ResolveError::InvalidEndpoint {
                endpoint: redact_endpoint(endpoint),
                reason: "missing host".to_string(),
            });
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(ResolveError::InvalidEndpoint {
                endpoint: redact_endpoint(endpoint),
                reason: "credentials must not be embedded in the URL".to_string(),
            });
        }
        if self.token.as_deref().is_none_or(str::is_empty) {
            return Err(ResolveError::MissingToken);
        }

        Ok(url)
    }
}

/// Render an endpoint for error messages without any userinfo component.
fn redact_endpoint(endpoint: &str) -> String {
    match Url::parse(endpoint) {
        Ok(mut url) => {
            let _ = url.set_username("");
            let _ = url.set_password(None);
            url.to_string()
        }
        Err(_) => match endpoint.split_once('@') {
            Some((_, host)) => format!("<redacted>@{host}"),
            None => endpoint.to_string(),
        },
    }
}

/// Idempotent release capability for a call-scoped client.
pub struct Release {
    released: AtomicBool,
    action: Box<dyn Fn() + Send + Sync>,
}

impl Release {
    pub fn new(action: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            released: AtomicBool::new(false),
            action: Box::new(action),
        }
    }

    /// Run the release action. Returns `true` only for the call that actually
    /// ran it; every later call is a no-op.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        (self.action)();
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

/// A resolved backend client plus its release capability.
///
/// Dropping the handle releases a call-scoped client, so the release runs on
/// every exit path of the owning call frame: normal return, `?`, a panic
/// unwinding through the frame, or the future being dropped on cancellation.
pub struct ClientHandle {
    client: Arc<dyn Backend>,
    release: Option<Release>,
    created_at: DateTime<Utc>,
}

impl ClientHandle {
    /// Handle to the shared default client. Owned by the identity, not the
    /// call, so it carries no release.
    pub fn shared(client: Arc<dyn Backend>) -> Self {
        Self {
            client,
            release: None,
            created_at: Utc::now(),
        }
    }

    /// Handle to a fresh client owned by a single call.
    pub fn scoped(client: Arc<dyn Backend>) -> Self {
        let closer = client.clone();
        Self {
            client,
            release: Some(Release::new(move || closer.close())),
            created_at: Utc::now(),
        }
    }

    pub fn client(&self) -> &Arc<dyn Backend> {
        &self.client
    }

    pub fn is_scoped(&self) -> bool {
        self.release.is_some()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Release the client now. Safe to call any number of times.
    pub fn release(&self) {
        if let Some(release) = &self.release {
            if release.release() {
                debug!(endpoint = %self.client.endpoint(), "released call-scoped client");
            }
        }
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("endpoint", &self.client.endpoint())
            .field("scoped", &self.is_scoped())
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Turns a [`CredentialScope`] into a live [`ClientHandle`].
#[derive(Clone)]
pub struct ClientFactory {
    connector: Arc<dyn BackendConnector>,
    verify_scoped: bool,
}

impl ClientFactory {
    pub fn new(connector: Arc<dyn BackendConnector>) -> Self {
        Self {
            connector,
            verify_scoped: true,
        }
    }

    /// Whether scoped clients are probed before being handed to a handler.
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify_scoped = verify;
        self
    }

    pub fn connector(&self) -> &Arc<dyn BackendConnector> {
        &self.connector
    }

    /// Resolve the acting client for one call.
    ///
    /// An empty scope yields a shared handle to `identity`'s default client.
    /// An explicit scope always yields a freshly built, call-scoped client.
    pub async fn resolve(
        &self,
        scope: &CredentialScope,
        identity: &ServerIdentity,
        cancel: &CancellationToken,
    ) -> Result<ClientHandle, ResolveError> {
        if scope.is_empty() {
            let client = identity
                .client()
                .cloned()
                .ok_or(ResolveError::NoDefaultIdentity)?;
            return Ok(ClientHandle::shared(client));
        }

        scope.validate()?;
        let endpoint = scope.endpoint().unwrap_or_default().to_string();

        let build = async {
            let client = self.connector.from_scope(scope).await?;
            // Wrapped before probing so an early exit below still releases it.
            let handle = ClientHandle::scoped(client);
            if self.verify_scoped {
                handle
                    .client()
                    .probe()
                    .await
                    .map_err(|e| classify_probe_error(&endpoint, e))?;
            }
            Ok(handle)
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResolveError::Cancelled),
            result = build => result,
        }
    }
}

fn classify_probe_error(endpoint: &str, err: BackendError) -> ResolveError {
    match err {
        BackendError::Unauthorized => ResolveError::Rejected {
            endpoint: redact_endpoint(endpoint),
        },
        other => ResolveError::Unreachable {
            endpoint: redact_endpoint(endpoint),
            reason: other.to_string(),
        },
    }
}
