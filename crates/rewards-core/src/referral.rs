//! 邀请奖励
//!
//! 被邀请用户的 `referral_claimed` 是唯一的幂等标记：先对被邀请人的文档做
//! false -> true 的 CAS，抢到翻转的一方才给邀请人入账。入账失败不回滚标记，
//! 即邀请奖励至多发放一次。

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::{Result, RewardsError};
use crate::ledger::{LedgerEngine, LedgerReason};
use crate::models::User;
use crate::settings::SettingsService;
use crate::store::{Store, StorePath, Versioned};
use crate::transport::{ChatTransport, SendOptions};

/// 邀请奖励结算结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferralOutcome {
    /// 已给邀请人入账
    Credited { referrer_id: String, amount: u64 },
    NoReferrer,
    AlreadyClaimed,
    SelfReferral,
    ReferrerMissing,
    /// 被邀请人未满足加入频道的条件
    NotMember,
}

impl ReferralOutcome {
    pub fn is_credited(&self) -> bool {
        matches!(self, Self::Credited { .. })
    }
}

/// 邀请奖励引擎
#[derive(Clone)]
pub struct ReferralEngine {
    store: Store,
    ledger: LedgerEngine,
    settings: SettingsService,
    transport: Arc<dyn ChatTransport>,
    max_attempts: u32,
}

impl ReferralEngine {
    pub fn new(
        store: Store,
        ledger: LedgerEngine,
        settings: SettingsService,
        transport: Arc<dyn ChatTransport>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            ledger,
            settings,
            transport,
            max_attempts,
        }
    }

    /// 记录邀请关系
    ///
    /// 只在用户尚无邀请人、且邀请人不是自己并且已建档时写入。返回是否写入。
    #[instrument(skip(self))]
    pub async fn record_referral(&self, new_user_id: &str, referrer_id: &str) -> Result<bool> {
        if new_user_id == referrer_id {
            return Ok(false);
        }
        if self
            .store
            .get::<User>(&StorePath::user(referrer_id))
            .await?
            .is_none()
        {
            debug!(referrer_id, "邀请人不存在，忽略");
            return Ok(false);
        }

        let mut recorded = false;
        self.store
            .update_with(
                &StorePath::user(new_user_id),
                self.max_attempts,
                |current: Option<User>| {
                    let mut user =
                        current.ok_or_else(|| RewardsError::UserNotFound(new_user_id.to_string()))?;
                    recorded = user.referred_by.is_none();
                    if recorded {
                        user.referred_by = Some(referrer_id.to_string());
                    }
                    Ok(user)
                },
            )
            .await?;

        if recorded {
            info!(new_user_id, referrer_id, "邀请关系已记录");
        }
        Ok(recorded)
    }

    /// 满足条件时给邀请人发放邀请奖励
    ///
    /// `membership` 为调用方已经确认的频道成员资格；为 None 且设置了必加频道时，
    /// 通过消息通道查询。加入时和重新验证时都走这一个入口，多次调用至多入账一次。
    #[instrument(skip(self))]
    pub async fn credit_referral_if_eligible(
        &self,
        new_user_id: &str,
        membership: Option<bool>,
    ) -> Result<ReferralOutcome> {
        let path = StorePath::user(new_user_id);
        let settings = self.settings.current().await?;

        let mut membership = membership;
        let mut attempt = 0;
        let referrer_id = loop {
            if attempt >= self.max_attempts.max(1) {
                warn!(new_user_id, "邀请标记翻转重试次数耗尽");
                return Err(RewardsError::Contention { path });
            }
            attempt += 1;

            let current: Versioned<User> = self
                .store
                .get(&path)
                .await?
                .ok_or_else(|| RewardsError::UserNotFound(new_user_id.to_string()))?;
            let user = &current.value;

            let Some(referrer_id) = user.referred_by.clone() else {
                return Ok(ReferralOutcome::NoReferrer);
            };
            if user.referral_claimed {
                return Ok(ReferralOutcome::AlreadyClaimed);
            }
            if referrer_id == user.id {
                return Ok(ReferralOutcome::SelfReferral);
            }
            if self
                .store
                .get::<User>(&StorePath::user(&referrer_id))
                .await?
                .is_none()
            {
                return Ok(ReferralOutcome::ReferrerMissing);
            }
            if let Some(channel) = settings.required_channel.as_deref() {
                let is_member = match membership {
                    Some(known) => known,
                    None => {
                        let checked = self.transport.is_member(channel, new_user_id).await?;
                        membership = Some(checked);
                        checked
                    }
                };
                if !is_member {
                    return Ok(ReferralOutcome::NotMember);
                }
            }

            let mut flipped = user.clone();
            flipped.referral_claimed = true;
            if self
                .store
                .compare_and_swap(&path, Some(&current), &flipped)
                .await?
            {
                break referrer_id;
            }
            debug!(new_user_id, attempt, "邀请标记 CAS 冲突，重新读取");
        };

        let base = settings.referral_reward;
        if base == 0 {
            info!(new_user_id, referrer_id = %referrer_id, "邀请奖励为 0，仅标记已结算");
            return Ok(ReferralOutcome::Credited {
                referrer_id,
                amount: 0,
            });
        }

        let receipt = self
            .ledger
            .credit_with(&referrer_id, LedgerReason::Referral, |referrer| {
                referrer.total_referrals = referrer.total_referrals.saturating_add(1);
                Ok(settings.apply_vip(base, referrer.is_vip()))
            })
            .await
            .inspect_err(|e| {
                warn!(new_user_id, referrer_id = %referrer_id, error = %e, "邀请奖励入账失败，标记已翻转不再重试");
            })?;

        let text = format!(
            "🎉 你邀请的用户已加入，获得 {} 积分，当前余额 {}",
            receipt.amount, receipt.balance
        );
        if let Err(e) = self
            .transport
            .send_message(&referrer_id, &text, &SendOptions::default())
            .await
        {
            debug!(referrer_id = %referrer_id, error = %e, "邀请奖励通知发送失败");
        }

        Ok(ReferralOutcome::Credited {
            referrer_id,
            amount: receipt.amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{UserProfile, VipTier};
    use crate::transport::{LogTransport, MockChatTransport};

    async fn seed(store: &Store, id: &str, referred_by: Option<&str>) {
        let mut user = User::new(&UserProfile::new(id, id), chrono::Utc::now());
        user.referred_by = referred_by.map(str::to_string);
        store.put(&StorePath::user(id), &user).await.unwrap();
    }

    fn engine(store: &Store, transport: Arc<dyn ChatTransport>) -> ReferralEngine {
        ReferralEngine::new(
            store.clone(),
            LedgerEngine::new(store.clone(), 10),
            SettingsService::new(store.clone()),
            transport,
            10,
        )
    }

    #[tokio::test]
    async fn test_credit_once() {
        let store = Store::memory();
        seed(&store, "a", None).await;
        seed(&store, "b", Some("a")).await;
        let engine = engine(&store, Arc::new(LogTransport));

        let first = engine.credit_referral_if_eligible("b", None).await.unwrap();
        assert_eq!(
            first,
            ReferralOutcome::Credited {
                referrer_id: "a".to_string(),
                amount: 1
            }
        );
        let second = engine.credit_referral_if_eligible("b", None).await.unwrap();
        assert_eq!(second, ReferralOutcome::AlreadyClaimed);

        let referrer = engine.ledger.balance("a").await.unwrap();
        assert_eq!(referrer, 1);
    }

    #[tokio::test]
    async fn test_ineligible_reasons() {
        let store = Store::memory();
        seed(&store, "solo", None).await;
        seed(&store, "selfish", Some("selfish")).await;
        seed(&store, "orphan", Some("ghost")).await;
        let engine = engine(&store, Arc::new(LogTransport));

        assert_eq!(
            engine.credit_referral_if_eligible("solo", None).await.unwrap(),
            ReferralOutcome::NoReferrer
        );
        assert_eq!(
            engine.credit_referral_if_eligible("selfish", None).await.unwrap(),
            ReferralOutcome::SelfReferral
        );
        assert_eq!(
            engine.credit_referral_if_eligible("orphan", None).await.unwrap(),
            ReferralOutcome::ReferrerMissing
        );
    }

    #[tokio::test]
    async fn test_vip_multiplier_read_at_credit_time() {
        let store = Store::memory();
        seed(&store, "a", None).await;
        seed(&store, "b", Some("a")).await;
        let engine = engine(&store, Arc::new(LogTransport));
        engine
            .settings
            .update(|s| {
                s.referral_reward = 2;
                s.vip_points_multiplier = 2.5;
            })
            .await
            .unwrap();
        crate::users::UserService::new(store.clone(), 5)
            .set_vip("a", Some(VipTier::Gold))
            .await
            .unwrap();

        let outcome = engine.credit_referral_if_eligible("b", None).await.unwrap();
        assert_eq!(
            outcome,
            ReferralOutcome::Credited {
                referrer_id: "a".to_string(),
                amount: 5
            }
        );
        let referrer = store
            .get::<User>(&StorePath::user("a"))
            .await
            .unwrap()
            .unwrap()
            .value;
        assert_eq!(referrer.total_referrals, 1);
    }

    #[tokio::test]
    async fn test_required_channel_checked_via_transport() {
        let store = Store::memory();
        seed(&store, "a", None).await;
        seed(&store, "b", Some("a")).await;

        let mut transport = MockChatTransport::new();
        transport
            .expect_is_member()
            .withf(|channel, user| channel == "@news" && user == "b")
            .times(1)
            .returning(|_, _| Ok(false));
        transport
            .expect_send_message()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let engine = engine(&store, Arc::new(transport));
        engine
            .settings
            .update(|s| s.required_channel = Some("@news".to_string()))
            .await
            .unwrap();

        let outcome = engine.credit_referral_if_eligible("b", None).await.unwrap();
        assert_eq!(outcome, ReferralOutcome::NotMember);

        // 调用方已确认成员资格时不再查询
        let outcome = engine
            .credit_referral_if_eligible("b", Some(true))
            .await
            .unwrap();
        assert!(outcome.is_credited());
    }

    #[tokio::test]
    async fn test_record_referral_only_once() {
        let store = Store::memory();
        seed(&store, "a", None).await;
        seed(&store, "c", None).await;
        seed(&store, "b", None).await;
        let engine = engine(&store, Arc::new(LogTransport));

        assert!(!engine.record_referral("b", "b").await.unwrap());
        assert!(!engine.record_referral("b", "ghost").await.unwrap());
        assert!(engine.record_referral("b", "a").await.unwrap());
        assert!(!engine.record_referral("b", "c").await.unwrap());

        let user = store
            .get::<User>(&StorePath::user("b"))
            .await
            .unwrap()
            .unwrap()
            .value;
        assert_eq!(user.referred_by.as_deref(), Some("a"));
    }
}
