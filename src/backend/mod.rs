//! Backend client abstraction.
//!
//! Tool handlers never talk to a cluster directly; they receive an
//! `Arc<dyn Backend>` resolved per call by the [`ClientFactory`]. The trait is
//! deliberately narrow: dynamic resource access plus a service-proxy GET is
//! enough for every functional area (workloads, Argo CD applications, Helm
//! release secrets, Istio CRDs, Prometheus queries).

mod factory;
mod cluster;

pub use factory::{ClientFactory, ClientHandle, CredentialScope, Release};
pub use cluster::{KubeBackend, KubeConnector};

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::{BackendResult, ResolveError};

/// Identifies a resource type in the cluster API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
    pub namespaced: bool,
}

impl ResourceRef {
    pub const fn core(kind: &'static str, plural: &'static str, namespaced: bool) -> Self {
        Self {
            group: "",
            version: "v1",
            kind,
            plural,
            namespaced,
        }
    }

    /// `group/version`, or just `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Look up a well-known resource by kind, plural or short name.
    pub fn lookup(name: &str) -> Option<ResourceRef> {
        let needle = name.to_ascii_lowercase();
        WELL_KNOWN
            .iter()
            .find(|(aliases, r)| {
                r.kind.eq_ignore_ascii_case(&needle)
                    || r.plural == needle
                    || aliases.contains(&needle.as_str())
            })
            .map(|(_, r)| r.clone())
    }
}

const WELL_KNOWN: &[(&[&str], ResourceRef)] = &[
    (&["po", "pod"], ResourceRef::core("Pod", "pods", true)),
    (&["svc", "service"], ResourceRef::core("Service", "services", true)),
    (&["cm", "configmap"], ResourceRef::core("ConfigMap", "configmaps", true)),
    (&["secret"], ResourceRef::core("Secret", "secrets", true)),
    (&["ns", "namespace"], ResourceRef::core("Namespace", "namespaces", false)),
    (&["no", "node"], ResourceRef::core("Node", "nodes", false)),
    (&["ev", "event"], ResourceRef::core("Event", "events", true)),
    (&["sa", "serviceaccount"], ResourceRef::core("ServiceAccount", "serviceaccounts", true)),
    (&["pvc"], ResourceRef::core("PersistentVolumeClaim", "persistentvolumeclaims", true)),
    (
        &["deploy", "deployment"],
        ResourceRef {
            group: "apps",
            version: "v1",
            kind: "Deployment",
            plural: "deployments",
            namespaced: true,
        },
    ),
    (
        &["sts", "statefulset"],
        ResourceRef {
            group: "apps",
            version: "v1",
            kind: "StatefulSet",
            plural: "statefulsets",
            namespaced: true,
        },
    ),
    (
        &["ds", "daemonset"],
        ResourceRef {
            group: "apps",
            version: "v1",
            kind: "DaemonSet",
            plural: "daemonsets",
            namespaced: true,
        },
    ),
    (
        &["job"],
        ResourceRef {
            group: "batch",
            version: "v1",
            kind: "Job",
            plural: "jobs",
            namespaced: true,
        },
    ),
    (
        &["ing", "ingress"],
        ResourceRef {
            group: "networking.k8s.io",
            version: "v1",
            kind: "Ingress",
            plural: "ingresses",
            namespaced: true,
        },
    ),
];

/// Narrow client interface shared by every functional area.
pub trait Backend: Send + Sync {
    /// The API server URL this client talks to.
    fn endpoint(&self) -> &str;

    /// List objects of a resource type, optionally scoped to a namespace and
    /// filtered by a label selector.
    fn list<'a>(
        &'a self,
        resource: &'a ResourceRef,
        namespace: Option<&'a str>,
        label_selector: Option<&'a str>,
    ) -> BoxFuture<'a, BackendResult<Vec<Value>>>;

    /// Fetch a single object.
    fn get<'a>(
        &'a self,
        resource: &'a ResourceRef,
        namespace: Option<&'a str>,
        name: &'a str,
    ) -> BoxFuture<'a, BackendResult<Value>>;

    /// Delete a single object.
    fn delete<'a>(
        &'a self,
        resource: &'a ResourceRef,
        namespace: Option<&'a str>,
        name: &'a str,
    ) -> BoxFuture<'a, BackendResult<()>>;

    /// GET through the API server's service proxy. `path` is relative to the
    /// API server root and may carry a query string.
    fn proxy_get<'a>(&'a self, path: &'a str) -> BoxFuture<'a, BackendResult<String>>;

    /// Cheap authenticated round trip used to verify reachability and
    /// credentials. Returns the server's git version.
    fn probe(&self) -> BoxFuture<'_, BackendResult<String>>;

    /// Tear down the underlying transport. Must be idempotent.
    fn close(&self);
}

/// Builds backend clients from configuration.
///
/// Split from [`ClientFactory`] so resolution policy (scoping, caching rules,
/// cancellation, release) is independent of the concrete cluster client.
pub trait BackendConnector: Send + Sync {
    /// Build a client from raw kubeconfig text (the default identity).
    fn from_kubeconfig<'a>(
        &'a self,
        raw: &'a str,
    ) -> BoxFuture<'a, Result<Arc<dyn Backend>, ResolveError>>;

    /// Build a fresh client for an explicit endpoint and token.
    fn from_scope<'a>(
        &'a self,
        scope: &'a CredentialScope,
    ) -> BoxFuture<'a, Result<Arc<dyn Backend>, ResolveError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_alias_kind_and_plural() {
        assert_eq!(ResourceRef::lookup("po").unwrap().plural, "pods");
        assert_eq!(ResourceRef::lookup("Deployment").unwrap().group, "apps");
        assert_eq!(ResourceRef::lookup("ingresses").unwrap().kind, "Ingress");
        assert!(ResourceRef::lookup("widgets").is_none());
    }

    #[test]
    fn test_api_version() {
        assert_eq!(ResourceRef::core("Pod", "pods", true).api_version(), "v1");
        assert_eq!(
            ResourceRef::lookup("deploy").unwrap().api_version(),
            "apps/v1"
        );
    }
}
