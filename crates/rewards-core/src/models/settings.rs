use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 全局运营设置
///
/// 每次使用时从存储读取，不做缓存，管理员修改后立即生效
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// 每个有效邀请奖励的积分
    pub referral_reward: u64,
    /// VIP 用户的积分倍率
    pub vip_points_multiplier: f64,
    pub claiming_enabled: bool,
    pub daily_reward_enabled: bool,
    pub maintenance_mode: bool,
    /// 邀请生效所需加入的频道，为空时不做检查
    pub required_channel: Option<String>,
    /// 新建产品时的默认定价（天数 -> 积分）
    pub default_pricing: BTreeMap<u32, u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            referral_reward: 1,
            vip_points_multiplier: 1.0,
            claiming_enabled: true,
            daily_reward_enabled: true,
            maintenance_mode: false,
            required_channel: None,
            default_pricing: BTreeMap::from([(1, 3), (3, 6), (7, 10), (15, 15), (30, 20)]),
        }
    }
}

impl Settings {
    /// 按 VIP 倍率放大奖励，向下取整，至少为 1
    pub fn apply_vip(&self, base: u64, is_vip: bool) -> u64 {
        if !is_vip || base == 0 {
            return base;
        }
        let scaled = (base as f64 * self.vip_points_multiplier).floor();
        if scaled < 1.0 { 1 } else { scaled as u64 }
    }
}
