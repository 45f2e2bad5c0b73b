//! 积分账本
//!
//! 积分余额的唯一写入方。所有变动都在用户文档上做乐观 CAS 循环：
//! 读取 -> 计算新余额 -> 对读取到的文档 CAS -> 不匹配则重读，
//! 耗尽尝试次数后返回 Contention。余额不足在提交时基于本轮读取的值判断。

mod daily;

pub use daily::{DailyReward, DailyRewardService, daily_amount};

use std::fmt;

use tracing::{info, instrument, warn};

use rewards_shared::observability::metrics;

use crate::error::{Result, RewardsError};
use crate::models::User;
use crate::store::{Store, StorePath};

/// 积分变动原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerReason {
    Referral,
    DailyReward,
    Claim,
    Admin,
}

impl LedgerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Referral => "referral",
            Self::DailyReward => "daily_reward",
            Self::Claim => "claim",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for LedgerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次入账的结果
#[derive(Debug, Clone)]
pub struct LedgerReceipt {
    pub amount: u64,
    pub balance: u64,
    /// 写入后的用户文档
    pub user: User,
}

/// 积分账本
#[derive(Clone)]
pub struct LedgerEngine {
    store: Store,
    max_attempts: u32,
}

impl LedgerEngine {
    pub fn new(store: Store, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts,
        }
    }

    /// 当前余额
    pub async fn balance(&self, user_id: &str) -> Result<u64> {
        self.store
            .get::<User>(&StorePath::user(user_id))
            .await?
            .map(|v| v.value.balance)
            .ok_or_else(|| RewardsError::UserNotFound(user_id.to_string()))
    }

    /// 入账
    ///
    /// 返回入账后的余额
    #[instrument(skip(self))]
    pub async fn credit(&self, user_id: &str, amount: u64, reason: LedgerReason) -> Result<u64> {
        if amount == 0 {
            return Err(RewardsError::Validation("入账金额必须大于 0".to_string()));
        }
        self.credit_with(user_id, reason, |_| Ok(amount))
            .await
            .map(|receipt| receipt.balance)
    }

    /// 在同一次 CAS 中修改用户的其他字段并入账
    ///
    /// `f` 可以修改除余额外的字段，并返回本次入账金额（以本轮读取的文档为准计算，
    /// 例如按当时的 VIP 等级放大）。`f` 返回错误时不写入。
    pub async fn credit_with<F>(
        &self,
        user_id: &str,
        reason: LedgerReason,
        mut f: F,
    ) -> Result<LedgerReceipt>
    where
        F: FnMut(&mut User) -> Result<u64>,
    {
        let path = StorePath::user(user_id);
        let mut amount = 0;

        let result = self
            .store
            .update_with(&path, self.max_attempts, |current: Option<User>| {
                let mut user =
                    current.ok_or_else(|| RewardsError::UserNotFound(user_id.to_string()))?;
                amount = f(&mut user)?;
                if amount == 0 {
                    return Err(RewardsError::Validation("入账金额必须大于 0".to_string()));
                }
                user.balance = user
                    .balance
                    .checked_add(amount)
                    .ok_or_else(|| RewardsError::Validation("积分余额溢出".to_string()))?;
                user.total_earned = user.total_earned.saturating_add(amount);
                Ok(user)
            })
            .await;

        match result {
            Ok(user) => {
                metrics::record_ledger_op("credit", reason.as_str(), "success", amount);
                info!(user_id, amount, reason = %reason, balance = user.balance, "积分已入账");
                Ok(LedgerReceipt {
                    amount,
                    balance: user.balance,
                    user,
                })
            }
            Err(e) => {
                metrics::record_ledger_op("credit", reason.as_str(), status_label(&e), amount);
                warn!(user_id, reason = %reason, error = %e, "积分入账失败");
                Err(e)
            }
        }
    }

    /// 扣减
    ///
    /// 余额不足时返回 InsufficientBalance，判断基于 CAS 循环内读取的余额。
    /// 返回扣减后的余额
    #[instrument(skip(self))]
    pub async fn debit(&self, user_id: &str, amount: u64, reason: LedgerReason) -> Result<u64> {
        if amount == 0 {
            return Err(RewardsError::Validation("扣减金额必须大于 0".to_string()));
        }
        let path = StorePath::user(user_id);

        let result = self
            .store
            .update_with(&path, self.max_attempts, |current: Option<User>| {
                let mut user =
                    current.ok_or_else(|| RewardsError::UserNotFound(user_id.to_string()))?;
                if user.balance < amount {
                    return Err(RewardsError::InsufficientBalance {
                        required: amount,
                        available: user.balance,
                    });
                }
                user.balance -= amount;
                user.total_spent = user.total_spent.saturating_add(amount);
                Ok(user)
            })
            .await;

        match result {
            Ok(user) => {
                metrics::record_ledger_op("debit", reason.as_str(), "success", amount);
                info!(user_id, amount, reason = %reason, balance = user.balance, "积分已扣减");
                Ok(user.balance)
            }
            Err(e) => {
                metrics::record_ledger_op("debit", reason.as_str(), status_label(&e), amount);
                warn!(user_id, amount, reason = %reason, error = %e, "积分扣减失败");
                Err(e)
            }
        }
    }

    /// 管理员调整积分，正数入账、负数扣减
    pub async fn admin_adjust(&self, user_id: &str, delta: i64) -> Result<u64> {
        match delta {
            0 => Err(RewardsError::Validation("调整值不能为 0".to_string())),
            d if d > 0 => self.credit(user_id, d.unsigned_abs(), LedgerReason::Admin).await,
            d => self.debit(user_id, d.unsigned_abs(), LedgerReason::Admin).await,
        }
    }
}

/// 指标中的状态标签
fn status_label(err: &RewardsError) -> &'static str {
    match err {
        RewardsError::InsufficientBalance { .. } => "insufficient_balance",
        RewardsError::Contention { .. } => "contention",
        RewardsError::UserNotFound(_) => "user_not_found",
        RewardsError::StoreUnavailable(_) => "store_unavailable",
        _ => "rejected",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserProfile;
    use chrono::Utc;

    async fn setup(balance: u64) -> LedgerEngine {
        let store = Store::memory();
        let mut user = User::new(&UserProfile::new("u1", "Alice"), Utc::now());
        user.balance = balance;
        store.put(&StorePath::user("u1"), &user).await.unwrap();
        LedgerEngine::new(store, 5)
    }

    #[tokio::test]
    async fn test_credit_updates_totals() {
        let ledger = setup(5).await;
        let balance = ledger.credit("u1", 3, LedgerReason::Referral).await.unwrap();
        assert_eq!(balance, 8);

        let user = ledger
            .store
            .get::<User>(&StorePath::user("u1"))
            .await
            .unwrap()
            .unwrap()
            .value;
        assert_eq!(user.total_earned, 3);
        assert_eq!(user.total_spent, 0);
    }

    #[tokio::test]
    async fn test_debit_insufficient_balance() {
        let ledger = setup(5).await;
        let err = ledger.debit("u1", 10, LedgerReason::Claim).await.unwrap_err();
        assert!(matches!(
            err,
            RewardsError::InsufficientBalance {
                required: 10,
                available: 5
            }
        ));
        assert_eq!(ledger.balance("u1").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_debit_updates_total_spent() {
        let ledger = setup(10).await;
        assert_eq!(ledger.debit("u1", 10, LedgerReason::Claim).await.unwrap(), 0);

        let user = ledger
            .store
            .get::<User>(&StorePath::user("u1"))
            .await
            .unwrap()
            .unwrap()
            .value;
        assert_eq!(user.total_spent, 10);
    }

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let ledger = setup(10).await;
        assert!(matches!(
            ledger.credit("u1", 0, LedgerReason::Admin).await,
            Err(RewardsError::Validation(_))
        ));
        assert!(matches!(
            ledger.debit("u1", 0, LedgerReason::Admin).await,
            Err(RewardsError::Validation(_))
        ));
        assert!(matches!(
            ledger.admin_adjust("u1", 0).await,
            Err(RewardsError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let ledger = setup(0).await;
        assert!(matches!(
            ledger.credit("nobody", 1, LedgerReason::Admin).await,
            Err(RewardsError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_admin_adjust() {
        let ledger = setup(10).await;
        assert_eq!(ledger.admin_adjust("u1", 5).await.unwrap(), 15);
        assert_eq!(ledger.admin_adjust("u1", -12).await.unwrap(), 3);
        assert!(matches!(
            ledger.admin_adjust("u1", -4).await,
            Err(RewardsError::InsufficientBalance { .. })
        ));
    }

    #[tokio::test]
    async fn test_credit_with_mutates_other_fields() {
        let ledger = setup(0).await;
        let receipt = ledger
            .credit_with("u1", LedgerReason::Referral, |user| {
                user.total_referrals += 1;
                Ok(2)
            })
            .await
            .unwrap();
        assert_eq!(receipt.amount, 2);
        assert_eq!(receipt.balance, 2);
        assert_eq!(receipt.user.total_referrals, 1);
    }
}
