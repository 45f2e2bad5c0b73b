//! 客服会话管理 API 处理器

use axum::{
    Json,
    extract::{Path, State},
};
use rewards_core::SupportSession;

use crate::{
    dto::{ApiResponse, CleanupResponse},
    error::AdminError,
    state::AppState,
};

/// 强制结束会话
///
/// POST /support/{user_id}/end
pub async fn force_end(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<SupportSession>>, AdminError> {
    let session = state.core.support.force_end(&user_id).await?;
    Ok(Json(ApiResponse::success(session)))
}

/// 进行中的会话
///
/// GET /support/sessions
pub async fn active_sessions(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<SupportSession>>>, AdminError> {
    Ok(Json(ApiResponse::success(
        state.core.support.active_sessions().await?,
    )))
}

/// 清理旧会话记录
///
/// POST /support/cleanup
pub async fn cleanup(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<CleanupResponse>>, AdminError> {
    let cleared = state
        .core
        .support
        .cleanup_completed(state.transcript_keep)
        .await?;
    Ok(Json(ApiResponse::success(CleanupResponse { cleared })))
}
