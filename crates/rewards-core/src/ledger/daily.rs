//! 每日签到奖励
//!
//! 24 小时冷却；距上次领取不足 48 小时则连续天数 +1，否则重置为 1。
//! 打卡时间戳与入账在同一次 CAS 中写入，并发领取只会成功一次。

use chrono::{DateTime, Duration, Utc};
use tracing::instrument;

use crate::error::{Result, RewardsError};
use crate::settings::SettingsService;

use super::{LedgerEngine, LedgerReason};

const COOLDOWN_HOURS: i64 = 24;
const STREAK_WINDOW_HOURS: i64 = 48;

/// 连续签到天数对应的基础奖励：2 + min(streak / 7, 3)
pub fn daily_amount(streak: u32) -> u64 {
    2 + u64::from((streak / 7).min(3))
}

/// 签到结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyReward {
    pub amount: u64,
    pub streak: u32,
    pub balance: u64,
}

/// 每日签到服务
#[derive(Clone)]
pub struct DailyRewardService {
    ledger: LedgerEngine,
    settings: SettingsService,
}

impl DailyRewardService {
    pub fn new(ledger: LedgerEngine, settings: SettingsService) -> Self {
        Self { ledger, settings }
    }

    #[instrument(skip(self))]
    pub async fn claim(&self, user_id: &str) -> Result<DailyReward> {
        self.claim_at(user_id, Utc::now()).await
    }

    pub(crate) async fn claim_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<DailyReward> {
        let settings = self.settings.current().await?;
        if !settings.daily_reward_enabled {
            return Err(RewardsError::DailyRewardDisabled);
        }

        let receipt = self
            .ledger
            .credit_with(user_id, LedgerReason::DailyReward, |user| {
                if user.is_banned {
                    return Err(RewardsError::UserBanned(user.id.clone()));
                }
                user.daily_streak = match user.last_daily_reward {
                    Some(last) => {
                        let elapsed = now - last;
                        if elapsed < Duration::hours(COOLDOWN_HOURS) {
                            let remaining = Duration::hours(COOLDOWN_HOURS) - elapsed;
                            let hours_left = (remaining.num_seconds() + 3599) / 3600;
                            return Err(RewardsError::DailyRewardNotReady { hours_left });
                        }
                        if elapsed < Duration::hours(STREAK_WINDOW_HOURS) {
                            user.daily_streak.saturating_add(1)
                        } else {
                            1
                        }
                    }
                    None => 1,
                };
                user.last_daily_reward = Some(now);
                Ok(settings.apply_vip(daily_amount(user.daily_streak), user.is_vip()))
            })
            .await?;

        Ok(DailyReward {
            amount: receipt.amount,
            streak: receipt.user.daily_streak,
            balance: receipt.balance,
        })
    }
}
