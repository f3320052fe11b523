/**
 * HTTP READ API - Sensor table for the map and dashboard collaborators
 *
 * ROUTES:
 * - GET /health          liveness, always "ok"
 * - GET /system/health   uptime, link state, feed source, ingest counters
 * - GET /sensors         full snapshot (records + source + stats)
 * - GET /sensors/{id}    one record, 404 for ids outside the known set
 *
 * Read only: telemetry enters through the live feed or the fallback
 * generator, never through HTTP.
 */

use crate::health::{HealthTracker, KernelHealth};
use crate::models::{SensorRecord, StoreSnapshot};
use crate::store::SensorStore;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};

#[derive(Clone)]
pub struct AppState {
    pub store: SensorStore,
    pub health: HealthTracker,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/sensors", get(get_sensors))
        .route("/sensors/{id}", get(get_sensor))
        .with_state(app_state)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health.get_health(&app.store))
}

// GET /sensors
async fn get_sensors(State(app): State<AppState>) -> Json<StoreSnapshot> {
    Json(app.store.snapshot())
}

// GET /sensors/{id}
async fn get_sensor(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SensorRecord>, StatusCode> {
    app.store.record(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}
