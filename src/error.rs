//! Error types for client resolution, dispatch, composition and reload.
//!
//! None of these messages ever include a bearer token. Endpoints are safe to
//! show; credentials are not.

use rmcp::model::ErrorCode;
use thiserror::Error;

use crate::tools::ToolArea;

/// MCP error code used when a call arrives on a session that has not
/// completed the `initialize` handshake.
pub const SESSION_NOT_INITIALIZED_ERROR_CODE: i32 = -32002;

/// MCP error code used when a call arrives on a session that has closed.
pub const SESSION_CLOSED_ERROR_CODE: i32 = -32003;

/// MCP error code used when the caller cancelled the request.
pub const REQUEST_CANCELLED_ERROR_CODE: i32 = -32800;

/// Errors raised by a [`crate::backend::Backend`] operation.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend client has been released")]
    Released,

    #[error("request was not authorized")]
    Unauthorized,

    #[error("{kind} `{name}` not found")]
    NotFound { kind: String, name: String },

    #[error("backend request failed: {0}")]
    Request(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Failure to obtain a backend client for a call.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no default cluster identity is loaded and the call carried no credentials")]
    NoDefaultIdentity,

    #[error("invalid cluster endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("a bearer token is required when a cluster endpoint is supplied")]
    MissingToken,

    #[error("a cluster endpoint is required when a bearer token is supplied")]
    MissingEndpoint,

    #[error("cluster `{endpoint}` is unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("cluster `{endpoint}` rejected the supplied credentials")]
    Rejected { endpoint: String },

    #[error("invalid client configuration: {0}")]
    Config(String),

    #[error("client resolution was cancelled")]
    Cancelled,
}

/// Errors that terminate a call before (or instead of) producing a tool result.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("session `{0}` has not been initialized")]
    NotInitialized(String),

    #[error("session `{0}` is closed")]
    SessionClosed(String),

    #[error("call to `{tool}` was cancelled after {elapsed_ms}ms")]
    Cancelled { tool: String, elapsed_ms: u128 },
}

impl DispatchError {
    /// Convert this error to an MCP `ErrorData` for protocol responses.
    pub fn to_mcp_error(&self) -> rmcp::ErrorData {
        match self {
            Self::ToolNotFound(_) => rmcp::ErrorData::invalid_params(self.to_string(), None),
            Self::NotInitialized(_) => rmcp::ErrorData::new(
                ErrorCode(SESSION_NOT_INITIALIZED_ERROR_CODE),
                self.to_string(),
                None,
            ),
            Self::SessionClosed(_) => rmcp::ErrorData::new(
                ErrorCode(SESSION_CLOSED_ERROR_CODE),
                self.to_string(),
                None,
            ),
            Self::Cancelled { .. } => rmcp::ErrorData::new(
                ErrorCode(REQUEST_CANCELLED_ERROR_CODE),
                self.to_string(),
                None,
            ),
        }
    }
}

/// Tool table composition failures.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("tool `{name}` is registered by both {first} and {second}")]
    DuplicateTool {
        name: String,
        first: ToolArea,
        second: ToolArea,
    },

    #[error("unknown tool area `{0}`")]
    UnknownArea(String),
}

/// Failures while rebuilding the default identity. Contained by the watcher.
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("failed to read `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration source `{0}` does not exist")]
    Missing(String),

    #[error(transparent)]
    Client(#[from] ResolveError),

    #[error(transparent)]
    Compose(#[from] ComposeError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session `{0}` already exists")]
    AlreadyExists(String),

    #[error("session limit of {0} reached")]
    CapacityExceeded(usize),
}

/// Outcome of a non-blocking notification send.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification channel is full; notification dropped")]
    Full,

    #[error("notification channel is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_errors_are_single_line() {
        let errors = [
            ResolveError::NoDefaultIdentity,
            ResolveError::MissingToken,
            ResolveError::MissingEndpoint,
            ResolveError::Rejected {
                endpoint: "https://cluster-b".to_string(),
            },
            ResolveError::Unreachable {
                endpoint: "https://cluster-b".to_string(),
                reason: "connection refused".to_string(),
            },
        ];
        for err in errors {
            assert!(!err.to_string().contains('\n'), "{err}");
        }
    }

    #[test]
    fn test_dispatch_error_codes() {
        let not_found = DispatchError::ToolNotFound("nope".to_string()).to_mcp_error();
        assert_eq!(not_found.code, ErrorCode::INVALID_PARAMS);

        let not_init = DispatchError::NotInitialized("s1".to_string()).to_mcp_error();
        assert_eq!(not_init.code, ErrorCode(SESSION_NOT_INITIALIZED_ERROR_CODE));
        assert!(not_init.message.contains("s1"));

        let closed = DispatchError::SessionClosed("s1".to_string()).to_mcp_error();
        assert_eq!(closed.code, ErrorCode(SESSION_CLOSED_ERROR_CODE));
    }

    #[test]
    fn test_duplicate_tool_message_names_both_areas() {
        let err = ComposeError::DuplicateTool {
            name: "k8s_get_resources".to_string(),
            first: ToolArea::Kubernetes,
            second: ToolArea::GitOps,
        };
        let msg = err.to_string();
        assert!(msg.contains("k8s_get_resources"));
        assert!(msg.contains("kubernetes"));
        assert!(msg.contains("gitops"));
    }
}
