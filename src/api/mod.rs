// HTTP endpoints served next to the MCP transport

use axum::{Router, extract::State, http::StatusCode, response::Json, routing::get};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::server::AppContext;

pub fn create_router(state: AppContext) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check(State(state): State<AppContext>) -> Result<Json<Value>, StatusCode> {
    let identity = state.identity.load();
    Ok(Json(serde_json::json!({
        "status": if identity.client().is_some() { "healthy" } else { "degraded" },
        "identity_version": identity.version(),
        "identity_loaded_at": identity.loaded_at().to_rfc3339(),
        "default_endpoint": identity.client().map(|c| c.endpoint().to_string()),
        "tools": identity.tools().len(),
        "sessions": state.sessions.len(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use tower::ServiceExt;

    use crate::backend::ClientFactory;
    use crate::dispatch::Dispatcher;
    use crate::identity::{IdentityStore, ServerIdentity};
    use crate::session::SessionRegistry;
    use crate::testing::{FakeBackend, FakeConnector, builder, identity_with_client};

    fn state(identity: ServerIdentity) -> AppContext {
        let connector = FakeConnector::new();
        let identity = Arc::new(IdentityStore::new(identity));
        AppContext {
            dispatcher: Dispatcher::new(identity.clone(), ClientFactory::new(connector.clone())),
            identity,
            sessions: Arc::new(SessionRegistry::new()),
            builder: builder(connector),
        }
    }

    async fn get_health(app: Router) -> Value {
        let response = app
            .oneshot(http::Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_identity_and_sessions() {
        let state = state(identity_with_client(FakeBackend::new("https://default")));
        let _session = state.sessions.create("s1").unwrap();

        let body = get_health(create_router(state)).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["identity_version"], 1);
        assert_eq!(body["default_endpoint"], "https://default");
        assert_eq!(body["sessions"], 1);
    }

    #[tokio::test]
    async fn test_health_without_default_identity_is_degraded() {
        let body = get_health(create_router(state(ServerIdentity::empty()))).await;
        assert_eq!(body["status"], "degraded");
        assert!(body["default_endpoint"].is_null());
    }
}
