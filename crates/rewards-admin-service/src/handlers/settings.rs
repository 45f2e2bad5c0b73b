//! 运营设置 API 处理器

use axum::{Json, extract::State};
use rewards_core::Settings;
use validator::Validate;

use crate::{
    dto::{ApiResponse, UpdateSettingsRequest},
    error::AdminError,
    state::AppState,
};

/// GET /settings
pub async fn get_settings(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Settings>>, AdminError> {
    Ok(Json(ApiResponse::success(state.core.settings.current().await?)))
}

/// 修改运营设置，只覆盖请求中出现的字段
///
/// PUT /settings
pub async fn update_settings(
    State(state): State<AppState>,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<Json<ApiResponse<Settings>>, AdminError> {
    req.validate()?;

    let settings = state
        .core
        .settings
        .update(|s| {
            if let Some(reward) = req.referral_reward {
                s.referral_reward = reward;
            }
            if let Some(multiplier) = req.vip_points_multiplier {
                s.vip_points_multiplier = multiplier;
            }
            if let Some(enabled) = req.claiming_enabled {
                s.claiming_enabled = enabled;
            }
            if let Some(enabled) = req.daily_reward_enabled {
                s.daily_reward_enabled = enabled;
            }
            if let Some(maintenance) = req.maintenance_mode {
                s.maintenance_mode = maintenance;
            }
            if let Some(channel) = &req.required_channel {
                s.required_channel = (!channel.trim().is_empty()).then(|| channel.trim().to_string());
            }
        })
        .await?;
    Ok(Json(ApiResponse::success(settings)))
}
