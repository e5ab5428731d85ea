//! Membership endpoints on parent tiers: children register, heartbeat and
//! unregister here, and operators list them or relay configuration to them.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{ConnectInfo, Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use super::{ApiResult, ApiState};
use crate::Error;
use crate::config::{EndpointDescriptor, TierConfig};
use crate::registry::RegistryEntry;

/// Build membership router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/unregister", post(unregister))
        .route("/heartbeat/{id}", get(heartbeat))
        .route("/children", get(list_children))
        .route(
            "/children/{id}/config",
            get(get_child_config).post(post_child_config),
        )
        .with_state(state)
}

/// Parse a child's snapshot and check it fits below this tier
fn child_snapshot(state: &ApiState, body: &[u8]) -> Result<TierConfig, Error> {
    let snapshot = TierConfig::from_json_slice(body)?;
    if let Some(role) = state.manager.role().child_role() {
        snapshot.check_role(role)?;
    }
    Ok(snapshot)
}

/// Register a child; its address is taken from the connection
async fn register(
    State(state): State<Arc<ApiState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let snapshot = child_snapshot(&state, &body)?;
    let descriptor = EndpointDescriptor {
        address: peer.ip().to_string(),
        port: snapshot.port,
        id: snapshot.id.clone(),
        description: snapshot.description.clone(),
    };

    state
        .manager
        .registry()
        .register(descriptor, Arc::new(snapshot));
    Ok(StatusCode::OK)
}

async fn unregister(State(state): State<Arc<ApiState>>, body: Bytes) -> ApiResult<StatusCode> {
    let snapshot = TierConfig::from_json_slice(&body)?;
    state.manager.registry().unregister(&snapshot.id);
    Ok(StatusCode::OK)
}

/// Refresh a child; unknown ids answer 500 so the child re-registers
async fn heartbeat(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.manager.registry().refresh(&id)?;
    Ok(StatusCode::OK)
}

/// One row of the children listing
#[derive(Debug, Serialize)]
pub struct ChildSummary {
    pub id: String,
    pub address: String,
    pub port: u16,
    pub description: String,
    pub registered_at: DateTime<Utc>,
    pub idle_secs: f64,
    pub sensors: Vec<String>,
}

impl ChildSummary {
    fn from_entry(entry: &RegistryEntry<Arc<TierConfig>>, now: Instant) -> Self {
        Self {
            id: entry.descriptor.id.clone(),
            address: entry.descriptor.address.clone(),
            port: entry.descriptor.port,
            description: entry.descriptor.description.clone(),
            registered_at: entry.registered_at,
            idle_secs: entry.idle(now).as_secs_f64(),
            sensors: entry.attached.sensors.iter().map(|s| s.id.clone()).collect(),
        }
    }
}

async fn list_children(State(state): State<Arc<ApiState>>) -> Json<Vec<ChildSummary>> {
    let now = Instant::now();
    let children = state
        .manager
        .registry()
        .list()
        .iter()
        .map(|entry| ChildSummary::from_entry(entry, now))
        .collect();
    Json(children)
}

fn known_child(state: &ApiState, id: &str) -> Result<EndpointDescriptor, Error> {
    state
        .manager
        .registry()
        .find(id)
        .map(|entry| entry.descriptor)
        .ok_or_else(|| Error::NotFound(format!("child '{id}' is not registered")))
}

/// Relay a configuration read to a child, answering its body verbatim
async fn get_child_config(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let child = known_child(&state, &id)?;
    let body = state.manager.downstream().fetch_config(&child).await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body))
}

/// Relay a configuration update to a child, answering its body verbatim
async fn post_child_config(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let child = known_child(&state, &id)?;
    let payload = String::from_utf8(body.to_vec())
        .map_err(|e| Error::Validation(format!("configuration is not UTF-8: {e}")))?;

    tracing::info!(child_id = %id, "relaying configuration update");
    let answer = state.manager.downstream().push_config(&child, payload).await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], answer))
}
