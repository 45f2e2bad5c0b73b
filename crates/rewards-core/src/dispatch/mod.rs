//! 命令分发
//!
//! 入站事件解析为带类型的 [`Command`]，经 [`CommandRegistry`] 路由到处理器。
//! 分发前统一检查维护模式、封禁与客服会话限制；处理器返回的领域错误
//! 渲染为面向用户的回复，不向调用方抛出。

mod command;
mod handler;
mod handlers;
mod registry;

pub use command::{Command, CommandKind, CommandOutcome, user_message};
pub use handler::CommandHandler;
pub use handlers::{
    AcceptSupportHandler, BalanceHandler, ClaimKeyHandler, DailyRewardHandler,
    EndSupportHandler, MyKeysHandler, RequestSupportHandler, StartHandler,
    SupportMessageHandler, VerifyMembershipHandler,
};
pub use registry::CommandRegistry;

use tracing::{error, info, instrument, warn};

use crate::error::{Result, RewardsError};
use crate::settings::SettingsService;
use crate::support::SupportRouter;
use crate::users::UserService;

/// 会话进行中拒绝其他命令时的错误码
pub const IN_SESSION_CODE: &str = "IN_SESSION";

/// 命令分发器
#[derive(Clone)]
pub struct Dispatcher {
    registry: CommandRegistry,
    settings: SettingsService,
    users: UserService,
    support: SupportRouter,
}

impl Dispatcher {
    pub fn new(
        registry: CommandRegistry,
        settings: SettingsService,
        users: UserService,
        support: SupportRouter,
    ) -> Self {
        Self {
            registry,
            settings,
            users,
            support,
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// 分发一条命令，错误渲染为回复
    #[instrument(skip(self, command), fields(kind = %command.kind(), actor = command.actor()))]
    pub async fn dispatch(&self, command: &Command) -> CommandOutcome {
        let actor = command.actor();

        let outcome = match self.guard(command).await {
            Ok(Some(rejected)) => rejected,
            Ok(None) => match self.route(command).await {
                Ok(outcome) => outcome,
                Err(e) => self.render(actor, &e),
            },
            Err(e) => self.render(actor, &e),
        };

        info!(success = outcome.success, code = ?outcome.error_code, "命令已处理");
        outcome
    }

    async fn route(&self, command: &Command) -> Result<CommandOutcome> {
        let handler = self.registry.get(command.kind()).ok_or_else(|| {
            RewardsError::Internal(format!("命令 {} 未注册处理器", command.kind()))
        })?;
        handler.handle(command).await
    }

    /// 分发前检查，返回 Some 表示命令被拒绝
    async fn guard(&self, command: &Command) -> Result<Option<CommandOutcome>> {
        let kind = command.kind();
        let actor = command.actor();

        let settings = self.settings.current().await?;
        if settings.maintenance_mode {
            let staff_bypass = kind.is_support() && self.support.staff().is_staff(actor).await?;
            if !staff_bypass {
                return Ok(Some(CommandOutcome::from_error(
                    actor,
                    &RewardsError::MaintenanceMode,
                )));
            }
        }

        // Start 由处理器在建档后检查封禁，预先封禁也能生效
        if kind != CommandKind::Start
            && self
                .users
                .get(actor)
                .await?
                .is_some_and(|user| user.is_banned)
        {
            return Ok(Some(CommandOutcome::from_error(
                actor,
                &RewardsError::UserBanned(actor.to_string()),
            )));
        }

        if !kind.allowed_in_session() && self.support.is_in_session(actor).await? {
            return Ok(Some(CommandOutcome::rejected(
                actor,
                IN_SESSION_CODE,
                "💬 客服会话进行中，只能发送消息；客服可以发送 /end 结束会话",
            )));
        }

        Ok(None)
    }

    fn render(&self, actor: &str, err: &RewardsError) -> CommandOutcome {
        if err.is_business_error() {
            warn!(error = %err, "命令被拒绝");
        } else {
            error!(error = %err, "命令处理失败");
        }
        CommandOutcome::from_error(actor, err)
    }
}
