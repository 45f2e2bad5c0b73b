//! 广播管理 API 处理器

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::info;
use validator::Validate;

use crate::{
    dto::{ApiResponse, BroadcastCreated, BroadcastJobDto, StartBroadcastRequest},
    error::AdminError,
    state::AppState,
};

/// 发起广播
///
/// POST /broadcast
pub async fn start_broadcast(
    State(state): State<AppState>,
    Json(req): Json<StartBroadcastRequest>,
) -> Result<Json<ApiResponse<BroadcastCreated>>, AdminError> {
    req.validate()?;

    let job = state.core.broadcast.start(req.segment, &req.message).await?;
    info!(job_id = %job.id, segment = %req.segment, total = job.total, "Broadcast started");

    Ok(Json(ApiResponse::success(BroadcastCreated {
        job_id: job.id,
        status: job.status,
        total: job.total,
    })))
}

/// 取消广播，已结束的任务原样返回
///
/// POST /broadcast/{job_id}/cancel
pub async fn cancel_broadcast(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ApiResponse<BroadcastJobDto>>, AdminError> {
    let job = state.core.broadcast.cancel(&job_id).await?;
    let message = if job.status.is_terminal() {
        "任务已结束"
    } else {
        "已请求取消"
    };
    Ok(Json(ApiResponse::success_with_message(job.into(), message)))
}

/// 查询广播任务
///
/// GET /broadcast/{job_id}
pub async fn get_broadcast(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ApiResponse<BroadcastJobDto>>, AdminError> {
    let job = state.core.broadcast.get(&job_id).await?;
    Ok(Json(ApiResponse::success(job.into())))
}

/// 广播任务列表，最新的在前
///
/// GET /broadcast
pub async fn list_broadcasts(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<BroadcastJobDto>>>, AdminError> {
    let jobs = state.core.broadcast.list().await?;
    Ok(Json(ApiResponse::success(
        jobs.into_iter().map(BroadcastJobDto::from).collect(),
    )))
}
