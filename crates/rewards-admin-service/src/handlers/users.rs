//! 用户管理 API 处理器

use axum::{
    Json,
    extract::{Path, Query, State},
};
use rewards_core::User;
use tracing::info;
use validator::Validate;

use crate::{
    dto::{
        AdjustPointsRequest, ApiResponse, BanResponse, PageResponse, PaginationParams,
        PointsResponse, SetBanRequest,
    },
    error::AdminError,
    state::AppState,
};

/// 用户列表，最新建档的在前
///
/// GET /users?page=&pageSize=
pub async fn list_users(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<User>>>, AdminError> {
    params.validate()?;

    let page = state
        .core
        .users
        .list_page(params.page, params.page_size)
        .await?;
    Ok(Json(ApiResponse::success(page.into())))
}

/// GET /users/{id}
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<User>>, AdminError> {
    let user = state.core.users.require(&user_id).await?;
    Ok(Json(ApiResponse::success(user)))
}

/// 调整积分
///
/// POST /users/{id}/points
pub async fn adjust_points(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<AdjustPointsRequest>,
) -> Result<Json<ApiResponse<PointsResponse>>, AdminError> {
    req.validate()?;

    let balance = state.core.ledger.admin_adjust(&user_id, req.delta).await?;
    info!(user_id = %user_id, delta = req.delta, balance, "Points adjusted");
    Ok(Json(ApiResponse::success(PointsResponse { user_id, balance })))
}

/// 封禁 / 解封
///
/// POST /users/{id}/ban
pub async fn set_ban(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<SetBanRequest>,
) -> Result<Json<ApiResponse<BanResponse>>, AdminError> {
    let registered = state.core.users.set_banned(&user_id, req.banned).await?;
    Ok(Json(ApiResponse::success(BanResponse {
        user_id,
        banned: req.banned,
        registered,
    })))
}
