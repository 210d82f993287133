//! Composition of the exposed tool surface.
//!
//! Each functional area contributes a fixed list of tools. Areas are always
//! merged in [`ToolArea::ALL`] order regardless of how the caller listed them,
//! so the resulting table (and the documentation order clients see) is stable.
//! Two areas registering the same tool name is a configuration error reported
//! here, never at call time.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::{ToolHandler, ToolTable, gitops, helm, kubernetes, mesh, observability};
use crate::error::ComposeError;

/// Functional area contributing tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ToolArea {
    Kubernetes,
    GitOps,
    Helm,
    Observability,
    ServiceMesh,
}

impl ToolArea {
    /// Every area, in composition order.
    pub const ALL: [ToolArea; 5] = [
        ToolArea::Kubernetes,
        ToolArea::GitOps,
        ToolArea::Helm,
        ToolArea::Observability,
        ToolArea::ServiceMesh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolArea::Kubernetes => "kubernetes",
            ToolArea::GitOps => "gitops",
            ToolArea::Helm => "helm",
            ToolArea::Observability => "observability",
            ToolArea::ServiceMesh => "service-mesh",
        }
    }

    /// The tools this area contributes.
    pub fn tools(&self, options: &ComposeOptions) -> Vec<Arc<dyn ToolHandler>> {
        match self {
            ToolArea::Kubernetes => kubernetes::tools(),
            ToolArea::GitOps => gitops::tools(&options.argocd_namespace),
            ToolArea::Helm => helm::tools(),
            ToolArea::Observability => observability::tools(&options.prometheus),
            ToolArea::ServiceMesh => mesh::tools(),
        }
    }
}

impl fmt::Display for ToolArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolArea {
    type Err = ComposeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kubernetes" | "k8s" => Ok(ToolArea::Kubernetes),
            "gitops" | "argo" | "argocd" => Ok(ToolArea::GitOps),
            "helm" => Ok(ToolArea::Helm),
            "observability" | "prometheus" => Ok(ToolArea::Observability),
            "service-mesh" | "mesh" | "istio" => Ok(ToolArea::ServiceMesh),
            other => Err(ComposeError::UnknownArea(other.to_string())),
        }
    }
}

/// Parse a comma-separated area list such as `k8s,helm`.
pub fn parse_areas(list: &str) -> Result<Vec<ToolArea>, ComposeError> {
    list.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(ToolArea::from_str)
        .collect()
}

/// How the server is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    #[default]
    Stdio,
    Http,
}

/// Where the Prometheus HTTP API is reached through the API server proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrometheusTarget {
    pub namespace: String,
    pub service: String,
    pub port: u16,
}

impl Default for PrometheusTarget {
    fn default() -> Self {
        Self {
            namespace: "monitoring".to_string(),
            service: "prometheus-server".to_string(),
            port: 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeOptions {
    pub transport: TransportMode,
    pub read_only: bool,
    pub argocd_namespace: String,
    pub prometheus: PrometheusTarget,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            transport: TransportMode::Stdio,
            read_only: false,
            argocd_namespace: "argocd".to_string(),
            prometheus: PrometheusTarget::default(),
        }
    }
}

impl ComposeOptions {
    fn admits(&self, handler: &dyn ToolHandler) -> bool {
        if self.read_only && handler.mutating() {
            return false;
        }
        if self.transport == TransportMode::Http && handler.local_only() {
            return false;
        }
        true
    }
}

/// Compose the tool table for the given areas.
pub fn compose(areas: &[ToolArea], options: &ComposeOptions) -> Result<ToolTable, ComposeError> {
    let mut ordered = areas.to_vec();
    ordered.sort();
    ordered.dedup();
    compose_tables(
        ordered.into_iter().map(|area| (area, area.tools(options))),
        options,
    )
}

/// Merge already-built per-area tables, applying transport and read-only
/// filters and rejecting duplicate names.
pub fn compose_tables(
    tables: impl IntoIterator<Item = (ToolArea, Vec<Arc<dyn ToolHandler>>)>,
    options: &ComposeOptions,
) -> Result<ToolTable, ComposeError> {
    let mut table = ToolTable::new();
    for (area, handlers) in tables {
        for handler in handlers {
            if options.admits(handler.as_ref()) {
                table.insert(area, handler)?;
            }
        }
    }
    Ok(table)
}
