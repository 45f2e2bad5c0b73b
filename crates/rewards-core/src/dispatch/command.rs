//! 入站命令

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RewardsError;
use crate::models::UserProfile;

/// 入站命令，由消息通道适配器解析后提交
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Command {
    /// 首次接触或 /start，可携带邀请人
    Start {
        user: UserProfile,
        #[serde(default)]
        referrer: Option<String>,
    },
    /// 用户声明已加入频道，重新结算邀请奖励
    VerifyMembership { user_id: String },
    ClaimKey {
        user_id: String,
        product_id: String,
        duration_days: u32,
    },
    DailyReward { user_id: String },
    Balance { user_id: String },
    MyKeys { user_id: String },
    RequestSupport { user_id: String },
    AcceptSupport {
        staff_id: String,
        user_id: String,
        request_id: i64,
    },
    SupportMessage { from: String, text: String },
    EndSupport { actor: String },
}

/// 命令类型，注册表的路由键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Start,
    VerifyMembership,
    ClaimKey,
    DailyReward,
    Balance,
    MyKeys,
    RequestSupport,
    AcceptSupport,
    SupportMessage,
    EndSupport,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::VerifyMembership => "verify_membership",
            Self::ClaimKey => "claim_key",
            Self::DailyReward => "daily_reward",
            Self::Balance => "balance",
            Self::MyKeys => "my_keys",
            Self::RequestSupport => "request_support",
            Self::AcceptSupport => "accept_support",
            Self::SupportMessage => "support_message",
            Self::EndSupport => "end_support",
        }
    }

    /// 客服会话相关命令
    pub fn is_support(&self) -> bool {
        matches!(
            self,
            Self::RequestSupport | Self::AcceptSupport | Self::SupportMessage | Self::EndSupport
        )
    }

    /// 会话进行中仍然允许的命令
    pub fn allowed_in_session(&self) -> bool {
        matches!(self, Self::SupportMessage | Self::EndSupport)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Start { .. } => CommandKind::Start,
            Self::VerifyMembership { .. } => CommandKind::VerifyMembership,
            Self::ClaimKey { .. } => CommandKind::ClaimKey,
            Self::DailyReward { .. } => CommandKind::DailyReward,
            Self::Balance { .. } => CommandKind::Balance,
            Self::MyKeys { .. } => CommandKind::MyKeys,
            Self::RequestSupport { .. } => CommandKind::RequestSupport,
            Self::AcceptSupport { .. } => CommandKind::AcceptSupport,
            Self::SupportMessage { .. } => CommandKind::SupportMessage,
            Self::EndSupport { .. } => CommandKind::EndSupport,
        }
    }

    /// 发起命令的账号，回复默认发给它
    pub fn actor(&self) -> &str {
        match self {
            Self::Start { user, .. } => &user.id,
            Self::VerifyMembership { user_id }
            | Self::ClaimKey { user_id, .. }
            | Self::DailyReward { user_id }
            | Self::Balance { user_id }
            | Self::MyKeys { user_id }
            | Self::RequestSupport { user_id } => user_id,
            Self::AcceptSupport { staff_id, .. } => staff_id,
            Self::SupportMessage { from, .. } => from,
            Self::EndSupport { actor } => actor,
        }
    }
}

/// 命令处理结果，回复文本交给消息通道发送
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub recipient: String,
    pub text: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl CommandOutcome {
    pub fn reply(recipient: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            text: text.into(),
            success: true,
            error_code: None,
        }
    }

    /// 把错误渲染为面向用户的回复
    pub fn from_error(recipient: impl Into<String>, err: &RewardsError) -> Self {
        Self {
            recipient: recipient.into(),
            text: user_message(err),
            success: false,
            error_code: Some(err.error_code().to_string()),
        }
    }

    pub fn rejected(recipient: impl Into<String>, code: &str, text: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            text: text.into(),
            success: false,
            error_code: Some(code.to_string()),
        }
    }
}

/// 面向用户的错误提示，库存不足与积分不足保持区分
pub fn user_message(err: &RewardsError) -> String {
    match err {
        RewardsError::InsufficientBalance {
            required,
            available,
        } => format!("❌ 积分不足：需要 {}，当前 {}", required, available),
        RewardsError::OutOfStock { duration_days, .. } => {
            format!("😔 {} 天的卡密已领完，请稍后再来", duration_days)
        }
        RewardsError::UserNotFound(_) => "请先发送 /start".to_string(),
        RewardsError::UserBanned(_) => "🚫 你的账号已被封禁".to_string(),
        RewardsError::ProductNotFound(_) => "❌ 产品不存在".to_string(),
        RewardsError::ProductInactive(_) => "❌ 该产品已下架".to_string(),
        RewardsError::PriceNotConfigured { duration_days, .. } => {
            format!("❌ 该产品没有 {} 天的档位", duration_days)
        }
        RewardsError::ClaimingDisabled => "⏸ 领取功能暂时关闭".to_string(),
        RewardsError::DailyRewardDisabled => "⏸ 每日签到暂时关闭".to_string(),
        RewardsError::DailyRewardNotReady { hours_left } => {
            format!("⏰ 今天已经签到过了，{} 小时后再来", hours_left)
        }
        RewardsError::AlreadyPending => "⏳ 你的客服请求正在排队，请耐心等待".to_string(),
        RewardsError::AlreadyActive => "💬 会话已在进行中".to_string(),
        RewardsError::RequestStale => "⚠️ 该请求已被处理或已失效".to_string(),
        RewardsError::NoActiveSession => "当前没有进行中的客服会话".to_string(),
        RewardsError::NotAuthorized(_) => "🚫 你没有权限执行该操作".to_string(),
        RewardsError::MaintenanceMode => "🛠 系统维护中，请稍后再试".to_string(),
        RewardsError::Validation(msg) => format!("❌ {}", msg),
        e if e.is_retryable() => "⚠️ 系统繁忙，请稍后重试".to_string(),
        _ => "⚠️ 出了点问题，请稍后重试".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_wire_format() {
        let command: Command = serde_json::from_value(json!({
            "type": "claim_key",
            "userId": "42",
            "productId": "pro-a",
            "durationDays": 7
        }))
        .unwrap();
        assert_eq!(command.kind(), CommandKind::ClaimKey);
        assert_eq!(command.actor(), "42");

        let start: Command = serde_json::from_value(json!({
            "type": "start",
            "user": {"id": "7", "name": "Ann"}
        }))
        .unwrap();
        assert!(matches!(start, Command::Start { referrer: None, .. }));
        assert_eq!(start.actor(), "7");
    }

    #[test]
    fn test_error_messages_stay_distinct() {
        let out_of_stock = CommandOutcome::from_error(
            "1",
            &RewardsError::OutOfStock {
                product_id: "p".to_string(),
                duration_days: 7,
            },
        );
        let broke = CommandOutcome::from_error(
            "1",
            &RewardsError::InsufficientBalance {
                required: 10,
                available: 5,
            },
        );
        assert_ne!(out_of_stock.text, broke.text);
        assert_eq!(out_of_stock.error_code.as_deref(), Some("OUT_OF_STOCK"));
        assert_eq!(broke.error_code.as_deref(), Some("INSUFFICIENT_BALANCE"));
        assert!(!broke.success);
    }

    #[test]
    fn test_kind_flags() {
        assert!(CommandKind::SupportMessage.allowed_in_session());
        assert!(!CommandKind::Balance.allowed_in_session());
        assert!(CommandKind::AcceptSupport.is_support());
        assert!(!CommandKind::ClaimKey.is_support());
    }
}
