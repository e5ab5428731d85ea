//! HTTP API of one tier
//!
//! Which routes are mounted depends on the tier role: every tier serves its own
//! configuration and health, parents add the membership and relay routes,
//! collectors add their sensor routes and the top tier adds the event stream.
//! Every failure answers 500 with the uniform error envelope.

pub mod config;
pub mod events;
pub mod health;
pub mod membership;
pub mod readings;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::TierRole;
use crate::manager::{ConfigManager, Installed};
use crate::{Error, Result};

/// Shared state for API handlers
#[derive(Debug, Clone)]
pub struct ApiState {
    pub manager: Arc<ConfigManager>,
}

impl ApiState {
    #[must_use]
    pub const fn new(manager: Arc<ConfigManager>) -> Self {
        Self { manager }
    }

    /// Current installation, or an error if the tier has none
    ///
    /// # Errors
    ///
    /// Returns an apply error when no configuration is running
    pub fn installed(&self) -> Result<Installed> {
        self.manager
            .installed()
            .ok_or_else(|| Error::Apply("no configuration is running".to_string()))
    }
}

/// Uniform error envelope body
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub status: u16,
    pub error: String,
    pub exception: &'static str,
}

/// Error answered by every handler
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        tracing::debug!(error = %self.0, kind = kind.as_str(), "request failed");

        let status = StatusCode::INTERNAL_SERVER_ERROR;
        let envelope = ErrorEnvelope {
            status: status.as_u16(),
            error: self.0.to_string(),
            exception: kind.as_str(),
        };
        (status, Json(envelope)).into_response()
    }
}

/// Handler result
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Build the router for the manager's role
pub fn router(state: Arc<ApiState>) -> Router {
    let role = state.manager.role();

    let mut router = Router::new()
        .merge(health::router(state.clone()))
        .merge(config::router(state.clone()));

    if role.keeps_registry() {
        router = router
            .merge(membership::router(state.clone()))
            .merge(readings::relay_router(state.clone()));
    }
    match role {
        TierRole::Collector => {
            router = router.merge(readings::sensor_router(state.clone()));
        }
        TierRole::Aggregator => {
            router = router.merge(readings::child_reading_router(state.clone()));
        }
        TierRole::Bridge => {
            router = router.merge(readings::nested_reading_router(state.clone()));
        }
    }
    if state.manager.hub().is_some() {
        router = router.merge(events::router(state));
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router.layer(cors).layer(TraceLayer::new_for_http())
}

/// HTTP listener of one tier
#[derive(Debug)]
pub struct ApiServer {
    state: Arc<ApiState>,
    addr: String,
}

impl ApiServer {
    #[must_use]
    pub fn new(state: Arc<ApiState>, addr: impl Into<String>) -> Self {
        Self {
            state,
            addr: addr.into(),
        }
    }

    /// Serve until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns error if the listener fails to bind or the server fails
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind {}: {e}", self.addr)))?;

        tracing::info!(
            addr = %self.addr,
            role = %self.state.manager.role(),
            "API server listening"
        );

        let app = router(self.state).into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn error_envelope_shape() {
        let response =
            ApiError(Error::NotFound("child 'N9' is not registered".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], 500);
        assert_eq!(json["exception"], "NotFoundError");
        assert!(json["error"].as_str().unwrap().contains("N9"));
    }
}
