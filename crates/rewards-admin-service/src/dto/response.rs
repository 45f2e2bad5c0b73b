//! 响应 DTO 定义

use rewards_core::{BroadcastJob, JobStatus, Page};
use serde::Serialize;

/// API 统一响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }

    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: message.into(),
            data: Some(data),
        }
    }
}

/// 广播已创建
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastCreated {
    pub job_id: String,
    pub status: JobStatus,
    pub total: u64,
}

/// 广播任务详情，附带进度百分比
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastJobDto {
    #[serde(flatten)]
    pub job: BroadcastJob,
    pub progress: u8,
}

impl From<BroadcastJob> for BroadcastJobDto {
    fn from(job: BroadcastJob) -> Self {
        let progress = job.progress();
        Self { job, progress }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemsAddedResponse {
    pub product_id: String,
    pub duration_days: u32,
    pub added: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedResponse {
    pub id: String,
    /// 一并删除的卡密数
    pub deleted_items: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsResponse {
    pub user_id: String,
    pub balance: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BanResponse {
    pub user_id: String,
    pub banned: bool,
    /// 用户是否已建档；未建档时写入的是预先封禁记录
    pub registered: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub cleared: usize,
}

/// 分页响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

impl<T> From<Page<T>> for PageResponse<T> {
    fn from(page: Page<T>) -> Self {
        let total_pages = page.total_pages();
        Self {
            items: page.items,
            total: page.total,
            page: page.page,
            page_size: page.page_size,
            total_pages,
        }
    }
}
