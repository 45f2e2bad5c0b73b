use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 客服会话状态
///
/// None -> Pending -> Active -> Completed -> None
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    None,
    Pending,
    Active,
    Completed,
}

impl SessionStatus {
    /// Pending 或 Active 时占用参与者
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptSender {
    User,
    Staff,
}

/// 会话记录中的一条消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub sender: TranscriptSender,
    pub sender_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// 客服会话，以用户 ID 为键
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportSession {
    pub user_id: String,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub staff_id: Option<String>,
    /// 单调递增的请求令牌，用于识别过期的接单通知
    pub request_id: i64,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_by: Option<String>,
    #[serde(default)]
    pub transcript: Vec<TranscriptEntry>,
}

impl SupportSession {
    pub fn pending(user_id: impl Into<String>, request_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            status: SessionStatus::Pending,
            staff_id: None,
            request_id,
            requested_at: now,
            accepted_at: None,
            ended_at: None,
            ended_by: None,
            transcript: Vec::new(),
        }
    }
}

/// 客服占用锁，以客服 ID 为键
///
/// 保证一个客服同一时间只有一个 Active 会话
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffLock {
    pub staff_id: String,
    pub user_id: String,
    pub request_id: i64,
    pub locked_at: DateTime<Utc>,
}

/// 客服人员
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportStaff {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub added_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}
