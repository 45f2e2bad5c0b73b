//! 奖励核心错误类型
//!
//! 定义服务层的业务错误和系统错误

use thiserror::Error;

use crate::store::StoreError;

/// 奖励核心错误类型
#[derive(Debug, Error)]
pub enum RewardsError {
    // === 积分账本 ===
    #[error("积分不足: 需要 {required}, 可用 {available}")]
    InsufficientBalance { required: u64, available: u64 },

    #[error("用户不存在: {0}")]
    UserNotFound(String),

    #[error("用户已被封禁: {0}")]
    UserBanned(String),

    // === 卡密库存 ===
    #[error("库存不足: product_id={product_id}, duration_days={duration_days}")]
    OutOfStock {
        product_id: String,
        duration_days: u32,
    },

    #[error("产品不存在: {0}")]
    ProductNotFound(String),

    #[error("产品已下架: {0}")]
    ProductInactive(String),

    #[error("产品未配置该时长的价格: product_id={product_id}, duration_days={duration_days}")]
    PriceNotConfigured {
        product_id: String,
        duration_days: u32,
    },

    #[error("领取功能已关闭")]
    ClaimingDisabled,

    // === 每日奖励 ===
    #[error("每日奖励已关闭")]
    DailyRewardDisabled,

    #[error("每日奖励尚未冷却: 还需 {hours_left} 小时")]
    DailyRewardNotReady { hours_left: i64 },

    // === 广播 ===
    #[error("广播任务不存在: {0}")]
    JobNotFound(String),

    #[error("接收方不可达: {0}")]
    RecipientUnreachable(String),

    // === 客服会话 ===
    #[error("已有等待中的客服请求")]
    AlreadyPending,

    #[error("已有进行中的客服会话")]
    AlreadyActive,

    #[error("客服请求已失效")]
    RequestStale,

    #[error("当前没有进行中的客服会话")]
    NoActiveSession,

    #[error("无权执行该操作: {0}")]
    NotAuthorized(String),

    #[error("系统维护中")]
    MaintenanceMode,

    // === 系统错误 ===
    #[error("并发冲突，重试次数已耗尽: {path}")]
    Contention { path: String },

    #[error("存储不可用: {0}")]
    StoreUnavailable(String),

    #[error("消息通道错误: {0}")]
    Transport(String),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 奖励核心 Result 类型别名
pub type Result<T> = std::result::Result<T, RewardsError>;

impl From<StoreError> for RewardsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            StoreError::Serialization(e) => Self::Serialization(e),
        }
    }
}

impl RewardsError {
    /// 检查是否为可重试的错误
    ///
    /// 调用方收到这些错误时可以稍后重新提交同一请求
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Contention { .. } | Self::StoreUnavailable(_) | Self::Transport(_)
        )
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Contention { .. }
                | Self::StoreUnavailable(_)
                | Self::Transport(_)
                | Self::Serialization(_)
                | Self::Internal(_)
        )
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::UserBanned(_) => "USER_BANNED",
            Self::OutOfStock { .. } => "OUT_OF_STOCK",
            Self::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            Self::ProductInactive(_) => "PRODUCT_INACTIVE",
            Self::PriceNotConfigured { .. } => "PRICE_NOT_CONFIGURED",
            Self::ClaimingDisabled => "CLAIMING_DISABLED",
            Self::DailyRewardDisabled => "DAILY_REWARD_DISABLED",
            Self::DailyRewardNotReady { .. } => "DAILY_REWARD_NOT_READY",
            Self::JobNotFound(_) => "JOB_NOT_FOUND",
            Self::RecipientUnreachable(_) => "RECIPIENT_UNREACHABLE",
            Self::AlreadyPending => "ALREADY_PENDING",
            Self::AlreadyActive => "ALREADY_ACTIVE",
            Self::RequestStale => "REQUEST_STALE",
            Self::NoActiveSession => "NO_ACTIVE_SESSION",
            Self::NotAuthorized(_) => "NOT_AUTHORIZED",
            Self::MaintenanceMode => "MAINTENANCE_MODE",
            Self::Contention { .. } => "CONTENTION",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
