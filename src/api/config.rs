//! Configuration endpoints: read and replace this tier's snapshot

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    routing::get,
};

use super::{ApiResult, ApiState};
use crate::Error;
use crate::config::TierConfig;
use crate::manager::ApplyOutcome;

/// Response header set when an applied snapshot moved the listener
pub const RESTART_REQUIRED_HEADER: HeaderName = HeaderName::from_static("x-restart-required");

/// Build configuration router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/config/{id}", get(get_config).post(post_config))
        .with_state(state)
}

fn check_id(current: &TierConfig, id: &str) -> Result<(), Error> {
    if current.id == id {
        Ok(())
    } else {
        Err(Error::NotFound(format!(
            "this tier is '{}', not '{id}'",
            current.id
        )))
    }
}

/// Current snapshot if `id` names this tier
async fn get_config(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<TierConfig>> {
    let installed = state.installed()?;
    check_id(&installed.snapshot, &id)?;
    Ok(Json(installed.snapshot.as_ref().clone()))
}

/// Replace the snapshot
///
/// When no configuration is running any id is accepted so a tier can be
/// recovered after a failed rollback.
async fn post_config(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Response> {
    if let Some(current) = state.manager.current() {
        check_id(&current, &id)?;
    }

    let snapshot = TierConfig::from_json_slice(&body)?;
    tracing::info!(id = %id, new_id = %snapshot.id, "configuration update received");

    match state.manager.apply(snapshot).await? {
        ApplyOutcome::Applied(report) => {
            let mut response = Json(report.snapshot.as_ref().clone()).into_response();
            if report.restart_required.is_some() {
                response
                    .headers_mut()
                    .insert(RESTART_REQUIRED_HEADER, HeaderValue::from_static("true"));
            }
            Ok(response)
        }
        ApplyOutcome::RolledBack {
            error,
            restored_generation,
        } => Err(Error::Apply(format!(
            "{error}; rolled back to generation {restored_generation}"
        ))
        .into()),
        ApplyOutcome::Fatal {
            error,
            rollback_error,
        } => {
            let detail = rollback_error.map_or_else(
                || format!("{error}; no previous configuration to restore"),
                |rb| format!("{error}; rollback failed: {rb}"),
            );
            Err(Error::Apply(detail).into())
        }
    }
}
