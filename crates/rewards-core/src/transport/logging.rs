use async_trait::async_trait;
use tracing::info;

use super::{ChatTransport, SendOptions, TransportError};

/// 仅记录日志的消息通道，用于本地开发
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

#[async_trait]
impl ChatTransport for LogTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send_message(
        &self,
        user_id: &str,
        text: &str,
        _options: &SendOptions,
    ) -> Result<(), TransportError> {
        info!(user_id, text, "模拟发送消息");
        Ok(())
    }

    async fn is_member(&self, channel_id: &str, user_id: &str) -> Result<bool, TransportError> {
        info!(channel_id, user_id, "模拟成员检查，默认通过");
        Ok(true)
    }
}
