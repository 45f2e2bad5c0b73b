//! 运营统计 API 处理器

use axum::{Json, extract::State};
use rewards_core::Stats;
use tracing::instrument;

use crate::{dto::ApiResponse, error::AdminError, state::AppState};

/// 统计总览
///
/// GET /stats
///
/// 用户数（活跃、屏蔽、封禁、近一天与近一周新增）、卡密数（已领、未领、
/// 已过期、近一天领取）以及产品数。
#[instrument(skip(state))]
pub async fn get_overview(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Stats>>, AdminError> {
    Ok(Json(ApiResponse::success(state.core.stats.overview().await?)))
}
