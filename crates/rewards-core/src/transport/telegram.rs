//! Telegram Bot API 消息通道
//!
//! 错误分类：
//! - 403（用户屏蔽机器人）、400 "chat not found" / "user is deactivated" -> 接收方不可达
//! - 429、5xx、网络错误 -> 瞬时故障，按退避重试
//! - 其余 4xx -> 消息被拒绝

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use rewards_shared::config::TransportConfig;
use rewards_shared::retry::{RetryPolicy, retry_with_policy};

use crate::error::RewardsError;

use super::{ChatTransport, SendOptions, TransportError};

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMember {
    status: String,
}

/// Telegram Bot API 客户端
#[derive(Clone)]
pub struct TelegramTransport {
    client: Client,
    api_base: String,
    token: String,
    retry: RetryPolicy,
}

impl TelegramTransport {
    pub fn new(config: &TransportConfig, token: &str) -> Result<Self, RewardsError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| RewardsError::Internal(format!("创建 HTTP 客户端失败: {}", e)))?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            retry: RetryPolicy {
                max_retries: 2,
                initial_delay: Duration::from_millis(250),
                max_delay: Duration::from_secs(4),
                multiplier: 4.0,
            },
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        payload: &serde_json::Value,
    ) -> Result<T, TransportError> {
        let url = self.url(method);
        retry_with_policy(
            &self.retry,
            method,
            TransportError::is_transient,
            || async {
                let res = self
                    .client
                    .post(&url)
                    .json(payload)
                    .send()
                    .await
                    .map_err(|e| TransportError::Transient(e.without_url().to_string()))?;
                let status = res.status();
                let body: TelegramResponse<T> = res
                    .json()
                    .await
                    .map_err(|e| TransportError::Transient(e.without_url().to_string()))?;

                if body.ok {
                    return body.result.ok_or_else(|| {
                        TransportError::Rejected(format!("{} 响应缺少 result", method))
                    });
                }
                Err(classify(
                    status,
                    body.description.as_deref().unwrap_or("unknown error"),
                ))
            },
        )
        .await
    }
}

/// 按状态码和描述对失败分类
fn classify(status: StatusCode, description: &str) -> TransportError {
    let lower = description.to_ascii_lowercase();
    if status == StatusCode::FORBIDDEN
        || lower.contains("chat not found")
        || lower.contains("user is deactivated")
        || lower.contains("bot was blocked")
    {
        return TransportError::RecipientUnreachable(description.to_string());
    }
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return TransportError::Transient(format!("{}: {}", status, description));
    }
    TransportError::Rejected(format!("{}: {}", status, description))
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    fn name(&self) -> &'static str {
        "telegram"
    }

    #[instrument(skip(self, text, options))]
    async fn send_message(
        &self,
        user_id: &str,
        text: &str,
        options: &SendOptions,
    ) -> Result<(), TransportError> {
        let mut payload = json!({
            "chat_id": user_id,
            "text": text,
            "disable_web_page_preview": options.disable_preview,
        });
        if let Some(mode) = options.parse_mode {
            payload["parse_mode"] = json!(mode);
        }
        let _: serde_json::Value = self.call("sendMessage", &payload).await?;
        debug!(user_id, "消息已发送");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn is_member(&self, channel_id: &str, user_id: &str) -> Result<bool, TransportError> {
        let payload = json!({ "chat_id": channel_id, "user_id": user_id });
        match self.call::<ChatMember>("getChatMember", &payload).await {
            Ok(member) => Ok(matches!(
                member.status.as_str(),
                "member" | "administrator" | "creator" | "restricted"
            )),
            // 用户从未加入过频道时 Telegram 返回 400
            Err(TransportError::Rejected(_)) | Err(TransportError::RecipientUnreachable(_)) => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
