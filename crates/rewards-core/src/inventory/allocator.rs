//! 卡密分配
//!
//! 同一个卡密至多发给一个用户：按入库时间从旧到新扫描候选，对候选文档做
//! Unclaimed -> Claimed 的 CAS，抢占失败换下一个。分配成功后再扣款，
//! 扣款失败时用补偿 CAS 把卡密退回卡密池。

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use rewards_shared::observability::metrics;

use crate::error::{Result, RewardsError};
use crate::ledger::{LedgerEngine, LedgerReason};
use crate::models::{InventoryItem, ItemStatus, Product, User};
use crate::settings::SettingsService;
use crate::store::{Store, StorePath, Versioned, paths};

/// 补偿 CAS 的最大尝试次数
const RELEASE_MAX_ATTEMPTS: u32 = 5;

/// 领取结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResult {
    pub item: InventoryItem,
    /// 扣款后的余额
    pub balance: u64,
    pub price: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_link: Option<String>,
}

/// 卡密分配器
#[derive(Clone)]
pub struct InventoryAllocator {
    store: Store,
    ledger: LedgerEngine,
    settings: SettingsService,
}

impl InventoryAllocator {
    pub fn new(store: Store, ledger: LedgerEngine, settings: SettingsService) -> Self {
        Self {
            store,
            ledger,
            settings,
        }
    }

    /// 用积分领取一个卡密
    #[instrument(skip(self))]
    pub async fn claim(
        &self,
        user_id: &str,
        product_id: &str,
        duration_days: u32,
    ) -> Result<ClaimResult> {
        let started = Instant::now();
        let result = self
            .claim_at(user_id, product_id, duration_days, Utc::now())
            .await;

        let status = match &result {
            Ok(_) => "success",
            Err(RewardsError::OutOfStock { .. }) => "out_of_stock",
            Err(RewardsError::InsufficientBalance { .. }) => "insufficient_balance",
            Err(e) if e.is_business_error() => "rejected",
            Err(_) => "error",
        };
        metrics::record_claim(product_id, status, started.elapsed().as_secs_f64());
        result
    }

    pub(crate) async fn claim_at(
        &self,
        user_id: &str,
        product_id: &str,
        duration_days: u32,
        now: DateTime<Utc>,
    ) -> Result<ClaimResult> {
        let settings = self.settings.current().await?;
        if !settings.claiming_enabled {
            return Err(RewardsError::ClaimingDisabled);
        }

        let user = self
            .store
            .get::<User>(&StorePath::user(user_id))
            .await?
            .map(Versioned::into_inner)
            .ok_or_else(|| RewardsError::UserNotFound(user_id.to_string()))?;
        if user.is_banned {
            return Err(RewardsError::UserBanned(user_id.to_string()));
        }

        let product = self
            .store
            .get::<Product>(&StorePath::product(product_id))
            .await?
            .map(Versioned::into_inner)
            .ok_or_else(|| RewardsError::ProductNotFound(product_id.to_string()))?;
        if !product.is_active {
            return Err(RewardsError::ProductInactive(product_id.to_string()));
        }

        let price = product
            .price_for(duration_days)
            .ok_or_else(|| RewardsError::PriceNotConfigured {
                product_id: product_id.to_string(),
                duration_days,
            })?;

        // 快速预检，真正的判断在扣款的 CAS 中
        if user.balance < price {
            return Err(RewardsError::InsufficientBalance {
                required: price,
                available: user.balance,
            });
        }

        let claimed = self
            .allocate(user_id, product_id, duration_days, now)
            .await?;

        let balance = if price == 0 {
            user.balance
        } else {
            match self.ledger.debit(user_id, price, LedgerReason::Claim).await {
                Ok(balance) => balance,
                Err(e) => {
                    self.release(&claimed).await;
                    return Err(e);
                }
            }
        };

        info!(
            user_id,
            product_id,
            duration_days,
            item_id = %claimed.id,
            price,
            balance,
            "卡密已领取"
        );
        Ok(ClaimResult {
            item: claimed,
            balance,
            price,
            download_link: product.download_link,
        })
    }

    /// 从卡密池中抢占一个卡密，返回领取后的卡密
    async fn allocate(
        &self,
        user_id: &str,
        product_id: &str,
        duration_days: u32,
        now: DateTime<Utc>,
    ) -> Result<InventoryItem> {
        let mut candidates: Vec<Versioned<InventoryItem>> = self
            .store
            .list::<InventoryItem>(paths::INVENTORY)
            .await?
            .into_iter()
            .filter(|v| v.value.in_pool(product_id, duration_days) && v.value.is_unclaimed())
            .collect();
        candidates.sort_by(|a, b| {
            a.value
                .added_at
                .cmp(&b.value.added_at)
                .then_with(|| a.value.id.cmp(&b.value.id))
        });

        for candidate in candidates {
            let claimed = candidate.value.claim(user_id, now);
            if self
                .store
                .compare_and_swap(&StorePath::item(&claimed.id), Some(&candidate), &claimed)
                .await?
            {
                return Ok(claimed);
            }
            debug!(item_id = %claimed.id, "卡密已被抢占，尝试下一个");
        }

        Err(RewardsError::OutOfStock {
            product_id: product_id.to_string(),
            duration_days,
        })
    }

    /// 补偿：扣款失败后把卡密退回卡密池
    ///
    /// 以重读为准，只要卡密仍是本次领取（同一用户、同一领取时间）就恢复为未领取，
    /// 其间其他字段（如到期提醒标记）被改写不影响补偿。
    async fn release(&self, claimed: &InventoryItem) {
        let path = StorePath::item(&claimed.id);
        let result = self
            .store
            .update_with(&path, RELEASE_MAX_ATTEMPTS, |current: Option<InventoryItem>| {
                let current = current.ok_or_else(|| {
                    RewardsError::Internal(format!("卡密已被删除: {}", claimed.id))
                })?;
                let ours = current.status == ItemStatus::Claimed
                    && current.claimed_by == claimed.claimed_by
                    && current.claimed_at == claimed.claimed_at;
                if !ours {
                    return Err(RewardsError::Internal(format!(
                        "卡密已被修改: {}",
                        claimed.id
                    )));
                }
                Ok(current.unclaim())
            })
            .await;

        match result {
            Ok(_) => warn!(item_id = %claimed.id, "扣款失败，卡密已退回卡密池"),
            Err(e) => error!(item_id = %claimed.id, error = %e, "补偿失败"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::ProductCatalog;
    use crate::models::{ItemStatus, UserProfile};
    use chrono::Duration;
    use tokio_test::{assert_err, assert_ok};

    struct Fixture {
        store: Store,
        allocator: InventoryAllocator,
        catalog: ProductCatalog,
    }

    async fn fixture() -> Fixture {
        let store = Store::memory();
        let settings = SettingsService::new(store.clone());
        let ledger = LedgerEngine::new(store.clone(), 5);
        let catalog = ProductCatalog::new(store.clone(), settings.clone(), 5);
        catalog
            .create_product("pro-a", "ProA", None, None)
            .await
            .unwrap();
        Fixture {
            allocator: InventoryAllocator::new(store.clone(), ledger, settings),
            store,
            catalog,
        }
    }

    async fn seed_user(store: &Store, id: &str, balance: u64) {
        let mut user = User::new(&UserProfile::new(id, id), Utc::now());
        user.balance = balance;
        store.put(&StorePath::user(id), &user).await.unwrap();
    }

    async fn seed_item(store: &Store, id: &str, added_at: DateTime<Utc>) {
        let item = InventoryItem::new(id, "pro-a", 7, format!("KEY-{}", id), added_at);
        store.put(&StorePath::item(id), &item).await.unwrap();
    }

    #[tokio::test]
    async fn test_claim_oldest_first() {
        let f = fixture().await;
        seed_user(&f.store, "u1", 100).await;
        let now = Utc::now();
        seed_item(&f.store, "newer", now).await;
        seed_item(&f.store, "older", now - Duration::hours(1)).await;

        let result = f.allocator.claim_at("u1", "pro-a", 7, now).await.unwrap();
        assert_eq!(result.item.id, "older");
        assert_eq!(result.price, 10);
        assert_eq!(result.balance, 90);
        assert_eq!(result.item.expires_at, Some(now + Duration::days(7)));
    }

    #[tokio::test]
    async fn test_insufficient_balance_leaves_item_untouched() {
        let f = fixture().await;
        seed_user(&f.store, "u1", 5).await;
        seed_item(&f.store, "k1", Utc::now()).await;

        let err = assert_err!(f.allocator.claim("u1", "pro-a", 7).await);
        assert!(matches!(
            err,
            RewardsError::InsufficientBalance {
                required: 10,
                available: 5
            }
        ));

        let item = f
            .store
            .get::<InventoryItem>(&StorePath::item("k1"))
            .await
            .unwrap()
            .unwrap()
            .value;
        assert_eq!(item.status, ItemStatus::Unclaimed);
    }

    #[tokio::test]
    async fn test_out_of_stock() {
        let f = fixture().await;
        seed_user(&f.store, "u1", 100).await;
        seed_item(&f.store, "k1", Utc::now()).await;

        assert_ok!(f.allocator.claim("u1", "pro-a", 7).await);
        let err = assert_err!(f.allocator.claim("u1", "pro-a", 7).await);
        assert!(matches!(
            err,
            RewardsError::OutOfStock {
                duration_days: 7,
                ..
            }
        ));
        assert_eq!(f.allocator.ledger.balance("u1").await.unwrap(), 90);
    }

    #[tokio::test]
    async fn test_check_order() {
        let f = fixture().await;
        seed_user(&f.store, "u1", 100).await;

        assert!(matches!(
            f.allocator.claim("u1", "nope", 7).await,
            Err(RewardsError::ProductNotFound(_))
        ));
        assert!(matches!(
            f.allocator.claim("u1", "pro-a", 2).await,
            Err(RewardsError::PriceNotConfigured { .. })
        ));

        f.catalog.set_product_active("pro-a", false).await.unwrap();
        assert!(matches!(
            f.allocator.claim("u1", "pro-a", 7).await,
            Err(RewardsError::ProductInactive(_))
        ));

        f.allocator
            .settings
            .update(|s| s.claiming_enabled = false)
            .await
            .unwrap();
        assert!(matches!(
            f.allocator.claim("u1", "pro-a", 7).await,
            Err(RewardsError::ClaimingDisabled)
        ));
    }

    #[tokio::test]
    async fn test_banned_user_rejected() {
        let f = fixture().await;
        let mut user = User::new(&UserProfile::new("u1", "u1"), Utc::now());
        user.balance = 100;
        user.is_banned = true;
        f.store.put(&StorePath::user("u1"), &user).await.unwrap();
        seed_item(&f.store, "k1", Utc::now()).await;

        assert!(matches!(
            f.allocator.claim("u1", "pro-a", 7).await,
            Err(RewardsError::UserBanned(_))
        ));
    }

    #[tokio::test]
    async fn test_release_survives_reminder_flag() {
        let f = fixture().await;
        seed_item(&f.store, "k1", Utc::now()).await;
        let original: Versioned<InventoryItem> = f
            .store
            .get(&StorePath::item("k1"))
            .await
            .unwrap()
            .unwrap();

        let claimed = original.value.claim("u1", Utc::now());
        f.store
            .compare_and_swap(&StorePath::item("k1"), Some(&original), &claimed)
            .await
            .unwrap();
        // 领取与补偿之间，提醒标记被并发写入
        let mut flagged = claimed.clone();
        flagged.expiry_notified = true;
        f.store.put(&StorePath::item("k1"), &flagged).await.unwrap();

        f.allocator.release(&claimed).await;

        let item = f
            .store
            .get::<InventoryItem>(&StorePath::item("k1"))
            .await
            .unwrap()
            .unwrap()
            .value;
        assert_eq!(item, original.value);
    }

    #[tokio::test]
    async fn test_release_leaves_reclaimed_item_alone() {
        let f = fixture().await;
        seed_item(&f.store, "k1", Utc::now()).await;
        let now = Utc::now();
        let item = f
            .store
            .get::<InventoryItem>(&StorePath::item("k1"))
            .await
            .unwrap()
            .unwrap()
            .value;

        let ours = item.claim("u1", now);
        let theirs = item.claim("u2", now + Duration::seconds(1));
        f.store.put(&StorePath::item("k1"), &theirs).await.unwrap();

        f.allocator.release(&ours).await;
        let stored = f
            .store
            .get::<InventoryItem>(&StorePath::item("k1"))
            .await
            .unwrap()
            .unwrap()
            .value;
        assert_eq!(stored, theirs);
    }
}
