//! Reading and warning endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};

use super::{ApiResult, ApiState};
use crate::Error;
use crate::gateway::Disposition;
use crate::reading::{Reading, Warning};
use crate::sampling::SensorSlots;

/// Routes served by collectors for their own sensors
pub fn sensor_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/reading/{sensor_id}", get(latest_reading))
        .route("/warning/{sensor_id}", get(current_warning))
        .with_state(state)
}

/// Routes served by parents on behalf of their children
pub fn relay_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/reading", post(push_reading))
        .route("/warning", post(push_warning))
        .with_state(state)
}

/// Reading relay of an aggregator, one hop down to a collector
pub fn child_reading_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/reading/{child_id}/{sensor_id}", get(relay_reading))
        .with_state(state)
}

/// Reading relay of the top tier, through an aggregator down to a collector
pub fn nested_reading_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route(
            "/reading/{aggregator_id}/{collector_id}/{sensor_id}",
            get(relay_nested_reading),
        )
        .with_state(state)
}

fn sensor(state: &ApiState, sensor_id: &str) -> Result<SensorSlots, Error> {
    let installed = state.installed()?;
    installed
        .sensors
        .get(sensor_id)
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("no sensor '{sensor_id}'")))
}

async fn latest_reading(
    State(state): State<Arc<ApiState>>,
    Path(sensor_id): Path<String>,
) -> ApiResult<Json<Reading>> {
    sensor(&state, &sensor_id)?
        .latest()
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("sensor '{sensor_id}' has no reading yet")).into())
}

/// Current warning, or 204 when the sensor is in band
async fn current_warning(
    State(state): State<Arc<ApiState>>,
    Path(sensor_id): Path<String>,
) -> ApiResult<Response> {
    let response = match sensor(&state, &sensor_id)?.warning() {
        Some(warning) => Json(warning).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    };
    Ok(response)
}

/// Accept a reading from a child, filter it and pass it on
///
/// Transport failures toward the parent are answered to the caller.
async fn push_reading(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> ApiResult<Json<Disposition>> {
    let reading = Reading::from_json_slice(&body)?;
    let installed = state.installed()?;
    let disposition = installed.gateway.submit(&reading).await?;
    Ok(Json(disposition))
}

/// Fetch a reading from a registered child, answering its body verbatim
async fn relay_reading(
    State(state): State<Arc<ApiState>>,
    Path((child_id, sensor_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    relay(&state, &child_id, &[sensor_id.as_str()]).await
}

async fn relay_nested_reading(
    State(state): State<Arc<ApiState>>,
    Path((aggregator_id, collector_id, sensor_id)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    relay(
        &state,
        &aggregator_id,
        &[collector_id.as_str(), sensor_id.as_str()],
    )
    .await
}

async fn relay(
    state: &ApiState,
    child_id: &str,
    path: &[&str],
) -> ApiResult<([(header::HeaderName, &'static str); 1], String)> {
    let child = state
        .manager
        .registry()
        .find(child_id)
        .ok_or_else(|| Error::NotFound(format!("child '{child_id}' is not registered")))?;

    let body = state
        .manager
        .downstream()
        .fetch_reading(&child.descriptor, path)
        .await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body))
}

/// Relay a warning upward, or broadcast it at the top tier
async fn push_warning(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> ApiResult<Json<Disposition>> {
    let warning: Warning =
        serde_json::from_slice(&body).map_err(|e| Error::Validation(e.to_string()))?;
    let installed = state.installed()?;
    let disposition = installed.gateway.relay_warning(&warning).await?;
    Ok(Json(disposition))
}
