//! Per-call dispatch: session check, identity snapshot, tool lookup, client
//! resolution, handler invocation.
//!
//! The identity is loaded once per call and every later step reads from that
//! snapshot, so a reload published mid-call never mixes a client from one
//! generation with a tool table from another. The resolved [`ClientHandle`]
//! lives in this frame and is released when it drops, on every exit path.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use rmcp::model::{CallToolResult, JsonObject};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{ClientFactory, CredentialScope};
use crate::error::{DispatchError, ResolveError};
use crate::identity::IdentityStore;
use crate::session::Session;
use crate::tools::{ToolContext, ToolTable, error_result};

/// One inbound `tools/call`.
#[derive(Debug, Clone, Default)]
pub struct ToolCall {
    pub name: String,
    pub arguments: JsonObject,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Option<JsonObject>) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.unwrap_or_default(),
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    identity: Arc<IdentityStore>,
    factory: ClientFactory,
}

impl Dispatcher {
    pub fn new(identity: Arc<IdentityStore>, factory: ClientFactory) -> Self {
        Self { identity, factory }
    }

    pub fn identity(&self) -> &Arc<IdentityStore> {
        &self.identity
    }

    /// Tool table a session sees: its private table, or the current default.
    pub async fn effective_tools(&self, session: Option<&Session>) -> Arc<ToolTable> {
        if let Some(private) = match session {
            Some(session) => session.tools().await,
            None => None,
        } {
            return private;
        }
        self.identity.load().tools().clone()
    }

    /// Run one call to completion.
    ///
    /// Protocol-level failures (unknown tool, session state, cancellation)
    /// come back as `Err`; client resolution and handler failures come back
    /// as an `is_error` result. Never both.
    pub async fn dispatch(
        &self,
        call: ToolCall,
        session: Option<&Session>,
        cancel: &CancellationToken,
    ) -> Result<CallToolResult, DispatchError> {
        let started = Instant::now();
        let session_id = session.map(|s| s.id().to_string());
        let session_label = session_id.as_deref().unwrap_or("none").to_string();

        if let Some(session) = session {
            session.mark_active()?;
        }

        let identity = self.identity.load();
        let private = match session {
            Some(session) => session.tools().await,
            None => None,
        };
        let table = private.unwrap_or_else(|| identity.tools().clone());
        let handler = table
            .get(&call.name)
            .ok_or_else(|| DispatchError::ToolNotFound(call.name.clone()))?;

        let ToolCall { name, mut arguments } = call;
        let call_scope = CredentialScope::take_from_args(&mut arguments);
        let pinned = match session {
            Some(session) if call_scope.is_empty() => session.scope().await,
            _ => CredentialScope::default(),
        };
        let namespace = call_scope
            .namespace()
            .or_else(|| pinned.namespace())
            .map(str::to_string);
        let scope = if call_scope.is_empty() { pinned } else { call_scope };

        let handle = match self.factory.resolve(&scope, &identity, cancel).await {
            Ok(handle) => handle,
            Err(ResolveError::Cancelled) => {
                return Err(DispatchError::Cancelled {
                    tool: name,
                    elapsed_ms: started.elapsed().as_millis(),
                });
            }
            Err(e) => {
                warn!(tool = %name, session = %session_label, error = %e, "could not resolve cluster client");
                return Ok(error_result(format!("tool `{name}` could not run: {e}")));
            }
        };
        debug!(
            tool = %name,
            session = %session_label,
            endpoint = %handle.client().endpoint(),
            scoped = handle.is_scoped(),
            identity_version = identity.version(),
            "dispatching tool call"
        );

        let ctx = ToolContext {
            client: handle.client().clone(),
            identity: identity.clone(),
            namespace,
            session_id,
            cancel: cancel.clone(),
        };

        let run = AssertUnwindSafe(handler.execute(arguments, &ctx)).catch_unwind();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            outcome = run => Some(outcome),
        };
        let elapsed_ms = started.elapsed().as_millis();

        match outcome {
            None => {
                info!(tool = %name, session = %session_label, elapsed_ms = elapsed_ms as u64, "tool call cancelled");
                Err(DispatchError::Cancelled { tool: name, elapsed_ms })
            }
            Some(Ok(Ok(result))) => {
                info!(tool = %name, session = %session_label, elapsed_ms = elapsed_ms as u64, "tool call completed");
                Ok(result)
            }
            Some(Ok(Err(e))) => {
                warn!(tool = %name, session = %session_label, elapsed_ms = elapsed_ms as u64, error = %e, "tool call failed");
                Ok(error_result(format!(
                    "tool `{name}` failed after {elapsed_ms}ms (session {session_label}): {e:#}"
                )))
            }
            Some(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                warn!(tool = %name, session = %session_label, elapsed_ms = elapsed_ms as u64, panic = %message, "tool handler panicked");
                Ok(error_result(format!(
                    "tool `{name}` panicked after {elapsed_ms}ms (session {session_label}): {message}"
                )))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
