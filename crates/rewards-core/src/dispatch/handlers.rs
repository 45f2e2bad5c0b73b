//! 内置命令处理器

use async_trait::async_trait;

use crate::error::{Result, RewardsError};
use crate::inventory::{InventoryAllocator, ProductCatalog};
use crate::ledger::{DailyRewardService, LedgerEngine};
use crate::referral::{ReferralEngine, ReferralOutcome};
use crate::support::SupportRouter;
use crate::users::UserService;

use super::command::{Command, CommandKind, CommandOutcome};
use super::handler::CommandHandler;

/// 命令与处理器不匹配，只会在注册错误时出现
fn mismatched(expected: CommandKind, command: &Command) -> RewardsError {
    RewardsError::Internal(format!(
        "处理器 {} 收到了 {} 命令",
        expected,
        command.kind()
    ))
}

fn referral_note(outcome: &ReferralOutcome) -> Option<&'static str> {
    match outcome {
        ReferralOutcome::Credited { .. } => Some("🎁 邀请关系已确认，邀请人获得奖励"),
        ReferralOutcome::NotMember => Some("📢 加入频道后发送 /verify 完成邀请验证"),
        _ => None,
    }
}

pub struct StartHandler {
    pub users: UserService,
    pub referral: ReferralEngine,
}

#[async_trait]
impl CommandHandler for StartHandler {
    fn kind(&self) -> CommandKind {
        CommandKind::Start
    }

    async fn handle(&self, command: &Command) -> Result<CommandOutcome> {
        let Command::Start { user, referrer } = command else {
            return Err(mismatched(self.kind(), command));
        };

        let (account, created) = self.users.ensure_user(user).await?;
        if account.is_banned {
            return Err(RewardsError::UserBanned(account.id));
        }

        if let (true, Some(referrer)) = (created, referrer) {
            self.referral.record_referral(&account.id, referrer).await?;
        }
        let outcome = self
            .referral
            .credit_referral_if_eligible(&account.id, None)
            .await?;

        let mut text = if created {
            format!("👋 欢迎，{}！你当前有 {} 积分", account.name, account.balance)
        } else {
            format!("👋 欢迎回来，{}！你当前有 {} 积分", account.name, account.balance)
        };
        if let Some(note) = referral_note(&outcome) {
            text.push('\n');
            text.push_str(note);
        }
        Ok(CommandOutcome::reply(&account.id, text))
    }
}

pub struct VerifyMembershipHandler {
    pub referral: ReferralEngine,
}

#[async_trait]
impl CommandHandler for VerifyMembershipHandler {
    fn kind(&self) -> CommandKind {
        CommandKind::VerifyMembership
    }

    async fn handle(&self, command: &Command) -> Result<CommandOutcome> {
        let Command::VerifyMembership { user_id } = command else {
            return Err(mismatched(self.kind(), command));
        };

        let text = match self
            .referral
            .credit_referral_if_eligible(user_id, None)
            .await?
        {
            ReferralOutcome::Credited { .. } => "✅ 验证通过，邀请奖励已发放给邀请人",
            ReferralOutcome::NotMember => "❌ 还没有检测到你加入频道，请加入后重试",
            ReferralOutcome::AlreadyClaimed => "✅ 已经验证过了",
            _ => "✅ 验证完成",
        };
        Ok(CommandOutcome::reply(user_id, text))
    }
}

pub struct ClaimKeyHandler {
    pub allocator: InventoryAllocator,
}

#[async_trait]
impl CommandHandler for ClaimKeyHandler {
    fn kind(&self) -> CommandKind {
        CommandKind::ClaimKey
    }

    async fn handle(&self, command: &Command) -> Result<CommandOutcome> {
        let Command::ClaimKey {
            user_id,
            product_id,
            duration_days,
        } = command
        else {
            return Err(mismatched(self.kind(), command));
        };

        let result = self
            .allocator
            .claim(user_id, product_id, *duration_days)
            .await?;
        let mut text = format!(
            "🔑 领取成功（{} 天）\n<code>{}</code>\n消耗 {} 积分，剩余 {} 积分",
            duration_days, result.item.payload, result.price, result.balance
        );
        if let Some(link) = &result.download_link {
            text.push_str(&format!("\n下载地址：{}", link));
        }
        Ok(CommandOutcome::reply(user_id, text))
    }
}

pub struct DailyRewardHandler {
    pub daily: DailyRewardService,
}

#[async_trait]
impl CommandHandler for DailyRewardHandler {
    fn kind(&self) -> CommandKind {
        CommandKind::DailyReward
    }

    async fn handle(&self, command: &Command) -> Result<CommandOutcome> {
        let Command::DailyReward { user_id } = command else {
            return Err(mismatched(self.kind(), command));
        };

        let reward = self.daily.claim(user_id).await?;
        Ok(CommandOutcome::reply(
            user_id,
            format!(
                "📅 签到成功 +{} 积分（连续 {} 天），当前 {} 积分",
                reward.amount, reward.streak, reward.balance
            ),
        ))
    }
}

pub struct BalanceHandler {
    pub ledger: LedgerEngine,
}

#[async_trait]
impl CommandHandler for BalanceHandler {
    fn kind(&self) -> CommandKind {
        CommandKind::Balance
    }

    async fn handle(&self, command: &Command) -> Result<CommandOutcome> {
        let Command::Balance { user_id } = command else {
            return Err(mismatched(self.kind(), command));
        };

        let balance = self.ledger.balance(user_id).await?;
        Ok(CommandOutcome::reply(
            user_id,
            format!("💰 当前积分：{}", balance),
        ))
    }
}

pub struct MyKeysHandler {
    pub catalog: ProductCatalog,
}

#[async_trait]
impl CommandHandler for MyKeysHandler {
    fn kind(&self) -> CommandKind {
        CommandKind::MyKeys
    }

    async fn handle(&self, command: &Command) -> Result<CommandOutcome> {
        let Command::MyKeys { user_id } = command else {
            return Err(mismatched(self.kind(), command));
        };

        let items = self.catalog.user_items(user_id).await?;
        if items.is_empty() {
            return Ok(CommandOutcome::reply(user_id, "你还没有领取过卡密"));
        }

        let lines: Vec<String> = items
            .iter()
            .map(|owned| {
                let state = match owned.hours_left {
                    _ if owned.expired => "已过期".to_string(),
                    Some(hours) => format!("剩余 {} 小时", hours),
                    None => "未知".to_string(),
                };
                format!(
                    "• {} / {} 天：<code>{}</code>（{}）",
                    owned.item.product_id, owned.item.duration_days, owned.item.payload, state
                )
            })
            .collect();
        Ok(CommandOutcome::reply(
            user_id,
            format!("🔑 我的卡密\n{}", lines.join("\n")),
        ))
    }
}

pub struct RequestSupportHandler {
    pub router: SupportRouter,
}

#[async_trait]
impl CommandHandler for RequestSupportHandler {
    fn kind(&self) -> CommandKind {
        CommandKind::RequestSupport
    }

    async fn handle(&self, command: &Command) -> Result<CommandOutcome> {
        let Command::RequestSupport { user_id } = command else {
            return Err(mismatched(self.kind(), command));
        };

        self.router.request_support(user_id).await?;
        Ok(CommandOutcome::reply(
            user_id,
            "📨 已通知客服，请稍候",
        ))
    }
}

pub struct AcceptSupportHandler {
    pub router: SupportRouter,
}

#[async_trait]
impl CommandHandler for AcceptSupportHandler {
    fn kind(&self) -> CommandKind {
        CommandKind::AcceptSupport
    }

    async fn handle(&self, command: &Command) -> Result<CommandOutcome> {
        let Command::AcceptSupport {
            staff_id,
            user_id,
            request_id,
        } = command
        else {
            return Err(mismatched(self.kind(), command));
        };

        self.router.accept(staff_id, user_id, *request_id).await?;
        Ok(CommandOutcome::reply(
            staff_id,
            format!("✅ 已接入用户 {}，发送 /end 结束会话", user_id),
        ))
    }
}

pub struct SupportMessageHandler {
    pub router: SupportRouter,
}

#[async_trait]
impl CommandHandler for SupportMessageHandler {
    fn kind(&self) -> CommandKind {
        CommandKind::SupportMessage
    }

    async fn handle(&self, command: &Command) -> Result<CommandOutcome> {
        let Command::SupportMessage { from, text } = command else {
            return Err(mismatched(self.kind(), command));
        };

        self.router.relay_message(from, text).await?;
        Ok(CommandOutcome::reply(from, "✉️ 已送达"))
    }
}

pub struct EndSupportHandler {
    pub router: SupportRouter,
}

#[async_trait]
impl CommandHandler for EndSupportHandler {
    fn kind(&self) -> CommandKind {
        CommandKind::EndSupport
    }

    async fn handle(&self, command: &Command) -> Result<CommandOutcome> {
        let Command::EndSupport { actor } = command else {
            return Err(mismatched(self.kind(), command));
        };

        let session = self.router.end(actor).await?;
        Ok(CommandOutcome::reply(
            actor,
            format!(
                "✅ 会话已结束，共 {} 条消息",
                session.transcript.len()
            ),
        ))
    }
}
