//! Health check endpoints

use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;

use super::ApiState;
use crate::config::TierRole;
use crate::liveness::LinkState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub role: TierRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_link: Option<LinkState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribers: Option<usize>,
}

/// Readiness response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
}

/// Individual readiness checks
#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub configuration: CheckResult,
    pub parent: CheckResult,
}

/// Result of a single check
#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    const fn ok() -> Self {
        Self {
            status: "ok",
            message: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            status: "fail",
            message: Some(message.into()),
        }
    }

    fn unavailable() -> Self {
        Self {
            status: "unavailable",
            message: Some("top tier has no parent".to_string()),
        }
    }
}

/// Build health router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
}

/// Liveness probe; answers even while unconfigured
async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    let manager = &state.manager;
    let installed = manager.installed();
    let role = manager.role();

    Json(HealthResponse {
        status: if installed.is_some() { "ok" } else { "unconfigured" },
        version: env!("CARGO_PKG_VERSION"),
        role,
        id: installed.as_ref().map(|i| i.snapshot.id.clone()),
        generation: installed.as_ref().map(|i| i.generation),
        parent_link: installed.as_ref().and_then(|i| i.link_state()),
        children: role.keeps_registry().then(|| manager.registry().len()),
        subscribers: manager.hub().map(crate::events::EventHub::subscriber_count),
    })
}

/// Readiness probe: a snapshot is running and, below the top tier, the
/// parent has accepted our registration
async fn ready(State(state): State<Arc<ApiState>>) -> (StatusCode, Json<ReadinessResponse>) {
    let installed = state.manager.installed();

    let configuration = if installed.is_some() {
        CheckResult::ok()
    } else {
        CheckResult::fail("no configuration is running")
    };

    let parent = match installed.as_ref().and_then(|i| i.link_state()) {
        Some(LinkState::Registered) => CheckResult::ok(),
        Some(other) => CheckResult::fail(format!("parent link is {}", other.as_str())),
        None if state.manager.role().has_parent() => {
            CheckResult::fail("parent link is not running")
        }
        None => CheckResult::unavailable(),
    };

    let all_ok = configuration.status == "ok" && parent.status != "fail";
    let http_status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        http_status,
        Json(ReadinessResponse {
            status: if all_ok { "ok" } else { "degraded" },
            checks: ReadinessChecks {
                configuration,
                parent,
            },
        }),
    )
}
