//! 入站命令端点
//!
//! 消息通道适配器把解析好的命令提交到这里，响应中携带要回复给用户的文本。
//! 领域错误体现在 `CommandOutcome` 中，HTTP 层始终返回 200。

use axum::{Json, extract::State};
use rewards_core::{Command, CommandOutcome};

use crate::{dto::ApiResponse, state::AppState};

/// POST /events
pub async fn submit_event(
    State(state): State<AppState>,
    Json(command): Json<Command>,
) -> Json<ApiResponse<CommandOutcome>> {
    let outcome = state.core.dispatcher.dispatch(&command).await;
    Json(ApiResponse::success(outcome))
}
