//! 请求 DTO 定义

use std::collections::BTreeMap;

use rewards_core::{ItemStatus, Segment};
use serde::Deserialize;
use validator::Validate;

/// 发起广播请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartBroadcastRequest {
    pub segment: Segment,
    #[validate(length(min = 1, max = 4096, message = "广播内容长度必须在1-4096个字符之间"))]
    pub message: String,
}

/// 创建产品请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 64, message = "产品 ID 长度必须在1-64个字符之间"))]
    pub id: String,
    #[validate(length(min = 1, max = 100, message = "产品名称长度必须在1-100个字符之间"))]
    pub name: String,
    /// 时长天数 -> 积分价格，缺省时使用运营设置中的默认价格
    pub pricing: Option<BTreeMap<u32, u64>>,
    pub download_link: Option<String>,
}

/// 批量入库卡密请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddItemsRequest {
    #[validate(range(min = 1, max = 3650, message = "时长必须在1-3650天之间"))]
    pub duration_days: u32,
    #[validate(length(min = 1, max = 1000, message = "单次入库数量必须在1-1000之间"))]
    pub items: Vec<String>,
}

/// 调整积分请求，正数加分、负数扣分
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdjustPointsRequest {
    #[validate(range(min = -1_000_000, max = 1_000_000, message = "单次调整不能超过一百万"))]
    pub delta: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBanRequest {
    pub banned: bool,
}

/// 运营设置修改，未提供的字段保持不变
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsRequest {
    pub referral_reward: Option<u64>,
    #[validate(range(min = 1.0, max = 10.0, message = "VIP 倍率必须在1-10之间"))]
    pub vip_points_multiplier: Option<f64>,
    pub claiming_enabled: Option<bool>,
    pub daily_reward_enabled: Option<bool>,
    pub maintenance_mode: Option<bool>,
    /// 空字符串表示取消频道要求
    pub required_channel: Option<String>,
}

/// 分页查询参数
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    #[validate(range(min = 1, message = "页码从1开始"))]
    pub page: u32,
    #[serde(default = "default_page_size")]
    #[validate(range(min = 1, max = 100, message = "每页条数必须在1-100之间"))]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

/// 卡密列表查询，status 缺省时返回全部
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ItemQueryParams {
    pub status: Option<ItemStatus>,
    #[serde(default = "default_page")]
    #[validate(range(min = 1, message = "页码从1开始"))]
    pub page: u32,
    #[serde(default = "default_page_size")]
    #[validate(range(min = 1, max = 100, message = "每页条数必须在1-100之间"))]
    pub page_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_query_defaults_and_bounds() {
        let params: ItemQueryParams = serde_json::from_str(r#"{"status":"claimed"}"#).unwrap();
        assert_eq!(params.status, Some(ItemStatus::Claimed));
        assert_eq!((params.page, params.page_size), (1, 20));
        assert!(params.validate().is_ok());

        let params = PaginationParams {
            page: 0,
            page_size: 500,
        };
        assert!(params.validate().is_err());
        assert!(PaginationParams::default().validate().is_ok());
    }
}
