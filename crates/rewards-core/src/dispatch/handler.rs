//! 命令处理器 Trait

use async_trait::async_trait;

use crate::error::Result;

use super::command::{Command, CommandKind, CommandOutcome};

/// 命令处理器
///
/// 每种命令一个实现，通过 [`super::CommandRegistry`] 按 [`CommandKind`] 路由。
/// 领域错误直接返回，由分发器统一渲染为用户提示。
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// 此处理器负责的命令类型
    fn kind(&self) -> CommandKind;

    async fn handle(&self, command: &Command) -> Result<CommandOutcome>;
}
