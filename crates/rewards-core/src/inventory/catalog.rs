//! 产品与卡密池管理

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{Result, RewardsError};
use crate::models::{InventoryItem, ItemStatus, Page, Product, StockSummary};
use crate::settings::SettingsService;
use crate::store::{Store, StorePath, paths};

const KEY_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const KEY_GROUPS: usize = 4;
const KEY_GROUP_LEN: usize = 4;

/// 用户已领取的卡密
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnedItem {
    pub item: InventoryItem,
    pub expired: bool,
    pub hours_left: Option<i64>,
}

/// 生成 n 个随机卡密，格式 XXXX-XXXX-XXXX-XXXX
pub fn generate_payloads(n: usize) -> Vec<String> {
    let mut rng = rand::rng();
    (0..n)
        .map(|_| {
            (0..KEY_GROUPS)
                .map(|_| {
                    (0..KEY_GROUP_LEN)
                        .map(|_| char::from(KEY_CHARSET[rng.random_range(0..KEY_CHARSET.len())]))
                        .collect::<String>()
                })
                .collect::<Vec<_>>()
                .join("-")
        })
        .collect()
}

/// 产品目录
#[derive(Clone)]
pub struct ProductCatalog {
    store: Store,
    settings: SettingsService,
    max_attempts: u32,
}

impl ProductCatalog {
    pub fn new(store: Store, settings: SettingsService, max_attempts: u32) -> Self {
        Self {
            store,
            settings,
            max_attempts,
        }
    }

    pub async fn get_product(&self, product_id: &str) -> Result<Product> {
        self.store
            .get::<Product>(&StorePath::product(product_id))
            .await?
            .map(|v| v.into_inner())
            .ok_or_else(|| RewardsError::ProductNotFound(product_id.to_string()))
    }

    /// 所有产品，按创建时间排序
    pub async fn list_products(&self) -> Result<Vec<Product>> {
        let mut products: Vec<Product> = self
            .store
            .list::<Product>(paths::PRODUCTS)
            .await?
            .into_iter()
            .map(|v| v.into_inner())
            .collect();
        products.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(products)
    }

    /// 创建产品
    ///
    /// 未指定价格时使用运营设置中的默认价格表
    #[instrument(skip(self, pricing))]
    pub async fn create_product(
        &self,
        product_id: &str,
        name: &str,
        pricing: Option<BTreeMap<u32, u64>>,
        download_link: Option<String>,
    ) -> Result<Product> {
        if product_id.is_empty() || product_id.contains('/') {
            return Err(RewardsError::Validation(format!(
                "产品 ID 不合法: {:?}",
                product_id
            )));
        }
        let pricing = match pricing {
            Some(pricing) => pricing,
            None => self.settings.current().await?.default_pricing,
        };
        let product = Product {
            id: product_id.to_string(),
            name: name.to_string(),
            pricing,
            is_active: true,
            download_link,
            created_at: Utc::now(),
        };

        if !self
            .store
            .create(&StorePath::product(product_id), &product)
            .await?
        {
            return Err(RewardsError::Validation(format!(
                "产品已存在: {}",
                product_id
            )));
        }
        info!(product_id, "产品已创建");
        Ok(product)
    }

    /// 替换价格表
    pub async fn update_pricing(
        &self,
        product_id: &str,
        pricing: BTreeMap<u32, u64>,
    ) -> Result<Product> {
        self.update_product(product_id, |product| product.pricing = pricing.clone())
            .await
    }

    /// 上架 / 下架
    pub async fn set_product_active(&self, product_id: &str, active: bool) -> Result<Product> {
        let product = self
            .update_product(product_id, |product| product.is_active = active)
            .await?;
        info!(product_id, active, "产品上下架状态已更新");
        Ok(product)
    }

    async fn update_product<F>(&self, product_id: &str, mut f: F) -> Result<Product>
    where
        F: FnMut(&mut Product),
    {
        self.store
            .update_with(
                &StorePath::product(product_id),
                self.max_attempts,
                |current: Option<Product>| {
                    let mut product = current
                        .ok_or_else(|| RewardsError::ProductNotFound(product_id.to_string()))?;
                    f(&mut product);
                    Ok(product)
                },
            )
            .await
    }

    /// 删除产品及其全部卡密，返回删除的卡密数
    #[instrument(skip(self))]
    pub async fn delete_product(&self, product_id: &str) -> Result<usize> {
        self.get_product(product_id).await?;

        let items = self.items_of(product_id).await?;
        for item in &items {
            self.store.delete(&StorePath::item(&item.id)).await?;
        }
        self.store.delete(&StorePath::product(product_id)).await?;

        info!(product_id, items = items.len(), "产品已删除");
        Ok(items.len())
    }

    /// 批量添加卡密，空行跳过，返回实际添加数
    #[instrument(skip(self, payloads), fields(count = payloads.len()))]
    pub async fn add_items(
        &self,
        product_id: &str,
        duration_days: u32,
        payloads: &[String],
    ) -> Result<usize> {
        let product = self.get_product(product_id).await?;
        if product.price_for(duration_days).is_none() {
            return Err(RewardsError::PriceNotConfigured {
                product_id: product_id.to_string(),
                duration_days,
            });
        }

        let now = Utc::now();
        let mut added = 0;
        for payload in payloads.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
            let item = InventoryItem::new(
                Uuid::now_v7().to_string(),
                product_id,
                duration_days,
                payload,
                now,
            );
            self.store.put(&StorePath::item(&item.id), &item).await?;
            added += 1;
        }

        info!(product_id, duration_days, added, "卡密已入库");
        Ok(added)
    }

    /// 按时长统计库存
    pub async fn stock(&self, product_id: &str) -> Result<Vec<StockSummary>> {
        let product = self.get_product(product_id).await?;
        let mut summary: BTreeMap<u32, StockSummary> = product
            .pricing
            .keys()
            .map(|&days| {
                (
                    days,
                    StockSummary {
                        duration_days: days,
                        ..Default::default()
                    },
                )
            })
            .collect();

        for item in self.items_of(product_id).await? {
            let entry = summary
                .entry(item.duration_days)
                .or_insert_with(|| StockSummary {
                    duration_days: item.duration_days,
                    ..Default::default()
                });
            match item.status {
                ItemStatus::Unclaimed => entry.unclaimed += 1,
                ItemStatus::Claimed => entry.claimed += 1,
            }
        }
        Ok(summary.into_values().collect())
    }

    /// 用户领取过的卡密，最新领取的在前
    pub async fn user_items(&self, user_id: &str) -> Result<Vec<OwnedItem>> {
        self.user_items_at(user_id, Utc::now()).await
    }

    pub(crate) async fn user_items_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<OwnedItem>> {
        let mut items: Vec<InventoryItem> = self
            .store
            .list::<InventoryItem>(paths::INVENTORY)
            .await?
            .into_iter()
            .map(|v| v.into_inner())
            .filter(|item| item.claimed_by.as_deref() == Some(user_id))
            .collect();
        items.sort_by(|a, b| b.claimed_at.cmp(&a.claimed_at));

        Ok(items
            .into_iter()
            .map(|item| OwnedItem {
                expired: item.is_expired(now),
                hours_left: item.hours_left(now),
                item,
            })
            .collect())
    }

    /// 分页列出产品下的卡密，可按状态过滤，按入库时间从旧到新
    pub async fn items_page(
        &self,
        product_id: &str,
        status: Option<ItemStatus>,
        page: u32,
        page_size: u32,
    ) -> Result<Page<InventoryItem>> {
        self.get_product(product_id).await?;
        let mut items: Vec<InventoryItem> = self
            .items_of(product_id)
            .await?
            .into_iter()
            .filter(|item| status.is_none_or(|s| item.status == s))
            .collect();
        items.sort_by(|a, b| a.added_at.cmp(&b.added_at).then(a.id.cmp(&b.id)));
        Ok(Page::slice(items, page, page_size))
    }

    async fn items_of(&self, product_id: &str) -> Result<Vec<InventoryItem>> {
        Ok(self
            .store
            .list::<InventoryItem>(paths::INVENTORY)
            .await?
            .into_iter()
            .map(|v| v.into_inner())
            .filter(|item| item.product_id == product_id)
            .collect())
    }
}
