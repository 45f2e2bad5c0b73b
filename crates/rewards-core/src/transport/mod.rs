//! 消息通道
//!
//! 核心只依赖 [`ChatTransport`] 这一边界：发送消息、查询频道成员资格。
//! 发送失败区分 "接收方不可达"（用户屏蔽了机器人，需要标记 blocked）
//! 与可重试的瞬时故障。

mod logging;
mod telegram;

pub use logging::LogTransport;
pub use telegram::TelegramTransport;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rewards_shared::config::TransportConfig;

use crate::error::RewardsError;

/// 消息通道错误
#[derive(Debug, Error)]
pub enum TransportError {
    /// 永久性失败：用户屏蔽了机器人或账号已注销
    #[error("接收方不可达: {0}")]
    RecipientUnreachable(String),

    /// 消息本身被拒绝（格式错误等），重试无意义
    #[error("消息被拒绝: {0}")]
    Rejected(String),

    /// 限流、网络错误、服务端错误，可以重试
    #[error("消息通道暂时不可用: {0}")]
    Transient(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<TransportError> for RewardsError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::RecipientUnreachable(msg) => Self::RecipientUnreachable(msg),
            other => Self::Transport(other.to_string()),
        }
    }
}

/// 文本格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseMode {
    #[serde(rename = "HTML")]
    Html,
    #[serde(rename = "MarkdownV2")]
    MarkdownV2,
}

/// 发送选项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub parse_mode: Option<ParseMode>,
    pub disable_preview: bool,
}

impl SendOptions {
    pub fn html() -> Self {
        Self {
            parse_mode: Some(ParseMode::Html),
            disable_preview: true,
        }
    }
}

/// 消息通道
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// 通道名称（用于日志）
    fn name(&self) -> &'static str;

    /// 向用户发送一条消息
    async fn send_message(
        &self,
        user_id: &str,
        text: &str,
        options: &SendOptions,
    ) -> Result<(), TransportError>;

    /// 用户是否为频道成员
    async fn is_member(&self, channel_id: &str, user_id: &str) -> Result<bool, TransportError>;
}

/// 按配置创建消息通道，未配置 token 时退化为仅记录日志
pub fn from_config(config: &TransportConfig) -> Result<Arc<dyn ChatTransport>, RewardsError> {
    match &config.telegram_bot_token {
        Some(token) if !token.is_empty() => Ok(Arc::new(TelegramTransport::new(config, token)?)),
        _ => Ok(Arc::new(LogTransport)),
    }
}
