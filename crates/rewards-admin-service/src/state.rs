//! 应用状态定义

use std::time::Instant;

use rewards_core::CoreServices;

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub core: CoreServices,
    /// 清理会话记录时保留的已结束会话数
    pub transcript_keep: usize,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(core: CoreServices, transcript_keep: usize) -> Self {
        Self {
            core,
            transcript_keep,
            started_at: Instant::now(),
        }
    }
}
