use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 产品
///
/// `pricing` 为 时长天数 -> 积分价格。库存数量由卡密池扫描得出，不单独存储计数。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub pricing: BTreeMap<u32, u64>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub download_link: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Product {
    pub fn price_for(&self, duration_days: u32) -> Option<u64> {
        self.pricing.get(&duration_days).copied()
    }
}

/// 单个时长档位的库存统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockSummary {
    pub duration_days: u32,
    pub unclaimed: u64,
    pub claimed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pricing_roundtrips_with_string_keys() {
        let product = Product {
            id: "pro-a".to_string(),
            name: "ProA".to_string(),
            pricing: BTreeMap::from([(7, 10), (30, 20)]),
            is_active: true,
            download_link: None,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&product).unwrap();
        assert_eq!(value["pricing"]["7"], 10);

        let back: Product = serde_json::from_value(value).unwrap();
        assert_eq!(back.price_for(30), Some(20));
        assert_eq!(back.price_for(1), None);
    }
}
