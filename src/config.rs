//! Server settings and kubeconfig path resolution.

use std::time::Duration;
use std::{env, path::PathBuf};

use clap::Args;

use crate::error::ComposeError;
use crate::identity::DEFAULT_RELOAD_INTERVAL;
use crate::session::DEFAULT_MAX_SESSIONS;
use crate::tools::{ComposeOptions, PrometheusTarget, ToolArea, TransportMode, parse_areas};

/// Settings shared by every subcommand that builds the server.
#[derive(Debug, Clone, Args)]
pub struct ServerSettings {
    /// Path to the kubeconfig for the default identity. Falls back to
    /// `$KUBECONFIG`, then `~/.kube/config`.
    #[arg(long)]
    pub kubeconfig: Option<String>,

    /// Kubeconfig context to use instead of `current-context`.
    #[arg(long, env = "CLUSTER_MCP_CONTEXT")]
    pub context: Option<String>,

    /// Seconds between kubeconfig change checks.
    #[arg(long, env = "CLUSTER_MCP_RELOAD_INTERVAL", default_value_t = DEFAULT_RELOAD_INTERVAL.as_secs())]
    pub reload_interval: u64,

    /// Comma-separated tool areas to expose.
    #[arg(long, env = "CLUSTER_MCP_TOOLSETS", default_value = "kubernetes,gitops,helm,observability,service-mesh")]
    pub toolsets: String,

    /// Hide tools that change cluster state.
    #[arg(long, env = "CLUSTER_MCP_READ_ONLY", default_value_t = false)]
    pub read_only: bool,

    /// Do not probe call-scoped credentials before running a tool.
    #[arg(long, default_value_t = false)]
    pub skip_credential_check: bool,

    /// Maximum number of concurrent MCP sessions.
    #[arg(long, default_value_t = DEFAULT_MAX_SESSIONS)]
    pub max_sessions: usize,

    #[arg(long, default_value = "argocd")]
    pub argocd_namespace: String,

    #[arg(long, default_value = "monitoring")]
    pub prometheus_namespace: String,

    #[arg(long, default_value = "prometheus-server")]
    pub prometheus_service: String,

    #[arg(long, default_value_t = 80)]
    pub prometheus_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let prometheus = PrometheusTarget::default();
        Self {
            kubeconfig: None,
            context: None,
            reload_interval: DEFAULT_RELOAD_INTERVAL.as_secs(),
            toolsets: ToolArea::ALL.map(|a| a.as_str()).join(","),
            read_only: false,
            skip_credential_check: false,
            max_sessions: DEFAULT_MAX_SESSIONS,
            argocd_namespace: "argocd".to_string(),
            prometheus_namespace: prometheus.namespace,
            prometheus_service: prometheus.service,
            prometheus_port: prometheus.port,
        }
    }
}

impl ServerSettings {
    pub fn areas(&self) -> Result<Vec<ToolArea>, ComposeError> {
        parse_areas(&self.toolsets)
    }

    pub fn compose_options(&self, transport: TransportMode) -> ComposeOptions {
        ComposeOptions {
            transport,
            read_only: self.read_only,
            argocd_namespace: self.argocd_namespace.clone(),
            prometheus: PrometheusTarget {
                namespace: self.prometheus_namespace.clone(),
                service: self.prometheus_service.clone(),
                port: self.prometheus_port,
            },
        }
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval.max(1))
    }

    pub fn verify_credentials(&self) -> bool {
        !self.skip_credential_check
    }

    pub fn kubeconfig_path(&self) -> anyhow::Result<PathBuf> {
        resolve_kubeconfig_path(self.kubeconfig.as_deref())
    }
}

/// Locate the kubeconfig for the default identity.
///
/// Only the first entry of a multi-file `KUBECONFIG` is watched.
pub fn resolve_kubeconfig_path(explicit: Option<&str>) -> anyhow::Result<PathBuf> {
    if let Some(p) = explicit.filter(|p| !p.trim().is_empty()) {
        return Ok(PathBuf::from(expand_env_vars(p)));
    }

    if let Some(first) = env::var_os("KUBECONFIG")
        .and_then(|raw| env::split_paths(&raw).find(|p| !p.as_os_str().is_empty()))
    {
        return Ok(first);
    }

    if let Some(home) = env::var_os("HOME") {
        return Ok(PathBuf::from(home).join(".kube").join("config"));
    }

    Err(anyhow::anyhow!(
        "Could not locate a kubeconfig (pass --kubeconfig, set KUBECONFIG or HOME)"
    ))
}

/// Replace `${VAR}` references with the variable's value. Unset variables
/// are left as written.
pub fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}
