use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 广播目标分群（固定枚举）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    /// 所有未拉黑、未封禁的用户
    All,
    /// 活跃窗口内有交互的用户
    Active,
    /// 拥有 VIP 等级的用户
    Vip,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::All => "all",
            Self::Active => "active",
            Self::Vip => "vip",
        };
        f.write_str(s)
    }
}

/// 广播任务状态
///
/// Pending -> Sending -> {Completed | Cancelled | Failed}，终态不可再变更
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Sending,
    Completed,
    Cancelled,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

/// 广播任务
///
/// 只由拥有它的广播 Worker 修改；`cancel_requested` 是例外，
/// 由取消接口写入，Worker 在每次刷新进度时读取。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastJob {
    pub id: String,
    pub segment: Segment,
    pub message: String,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub sent: u64,
    #[serde(default)]
    pub delivered: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl BroadcastJob {
    pub fn new(id: impl Into<String>, segment: Segment, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            segment,
            message: message.into(),
            total: 0,
            sent: 0,
            delivered: 0,
            failed: 0,
            status: JobStatus::Pending,
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// 进度百分比（0-100）
    pub fn progress(&self) -> u8 {
        if self.total == 0 {
            return if self.status.is_terminal() { 100 } else { 0 };
        }
        ((self.sent.min(self.total) * 100) / self.total) as u8
    }
}

/// 广播目标快照
///
/// 任务启动时计算一次，之后加入的用户不会收到该次广播
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastTargets {
    pub job_id: String,
    pub user_ids: Vec<String>,
}
