//! 运营统计
//!
//! 每次请求全量扫描用户、卡密与产品并在内存中聚合，不维护计数器。

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, instrument};

use crate::error::Result;
use crate::models::{InventoryItem, ItemStatus, KeyStats, Product, Stats, User, UserStats};
use crate::store::{Store, paths};

#[derive(Clone)]
pub struct StatsService {
    store: Store,
}

impl StatsService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn overview(&self) -> Result<Stats> {
        self.overview_at(Utc::now()).await
    }

    pub(crate) async fn overview_at(&self, now: DateTime<Utc>) -> Result<Stats> {
        let users: Vec<User> = self
            .store
            .list::<User>(paths::USERS)
            .await?
            .into_iter()
            .map(|v| v.into_inner())
            .collect();
        let items: Vec<InventoryItem> = self
            .store
            .list::<InventoryItem>(paths::INVENTORY)
            .await?
            .into_iter()
            .map(|v| v.into_inner())
            .collect();
        let products = self.store.list::<Product>(paths::PRODUCTS).await?.len() as u64;

        let stats = Stats {
            users: user_stats(&users, now),
            keys: key_stats(&items, now),
            products,
        };
        debug!(users = stats.users.total, keys = stats.keys.total, "统计已生成");
        Ok(stats)
    }
}

fn user_stats(users: &[User], now: DateTime<Utc>) -> UserStats {
    let day_ago = now - Duration::days(1);
    let week_ago = now - Duration::days(7);
    let mut stats = UserStats::default();
    for user in users {
        stats.total += 1;
        if user.is_blocked {
            stats.blocked += 1;
        }
        if user.is_banned {
            stats.banned += 1;
        }
        if !user.is_blocked && !user.is_banned {
            stats.active += 1;
        }
        if user.joined_at > day_ago {
            stats.new_today += 1;
        }
        if user.joined_at > week_ago {
            stats.new_this_week += 1;
        }
    }
    stats
}

fn key_stats(items: &[InventoryItem], now: DateTime<Utc>) -> KeyStats {
    let day_ago = now - Duration::days(1);
    let mut stats = KeyStats::default();
    for item in items {
        stats.total += 1;
        match item.status {
            ItemStatus::Unclaimed => stats.unclaimed += 1,
            ItemStatus::Claimed => {
                stats.claimed += 1;
                if item.is_expired(now) {
                    stats.expired += 1;
                }
                if item.claimed_at.is_some_and(|at| at > day_ago) {
                    stats.claimed_today += 1;
                }
            }
        }
    }
    stats
}
