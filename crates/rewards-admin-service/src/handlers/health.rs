//! 健康检查

use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use crate::state::AppState;

const SERVICE_NAME: &str = "rewards-admin-service";

/// 存活探针
///
/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "store": state.core.store.backend_name(),
        "runningBroadcasts": state.core.broadcast.running_count(),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
    }))
}

/// 就绪探针：存储可读才算就绪
///
/// GET /ready
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let store_ok = state.core.settings.current().await.is_ok();
    let status = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if store_ok { "ok" } else { "degraded" },
            "service": SERVICE_NAME,
            "checks": {
                "store": if store_ok { "ok" } else { "fail" }
            }
        })),
    )
}
