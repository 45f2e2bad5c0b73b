use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 卡密状态
///
/// 只能从 Unclaimed 变为 Claimed，回退仅发生在领取扣款失败的补偿中
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Unclaimed,
    Claimed,
}

/// 卡密
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub id: String,
    pub product_id: String,
    pub duration_days: u32,
    /// 卡密内容，对核心逻辑不透明
    pub payload: String,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default)]
    pub claimed_by: Option<String>,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub added_at: DateTime<Utc>,
    #[serde(default)]
    pub expiry_notified: bool,
}

impl InventoryItem {
    pub fn new(
        id: impl Into<String>,
        product_id: impl Into<String>,
        duration_days: u32,
        payload: impl Into<String>,
        added_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            product_id: product_id.into(),
            duration_days,
            payload: payload.into(),
            status: ItemStatus::Unclaimed,
            claimed_by: None,
            claimed_at: None,
            expires_at: None,
            added_at,
            expiry_notified: false,
        }
    }

    pub fn is_unclaimed(&self) -> bool {
        self.status == ItemStatus::Unclaimed
    }

    /// 是否属于指定卡密池
    pub fn in_pool(&self, product_id: &str, duration_days: u32) -> bool {
        self.product_id == product_id && self.duration_days == duration_days
    }

    /// 惰性过期判断：now > expiresAt。未领取的卡密永不过期
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }

    /// 剩余小时数（向上取整），已过期或未领取时为 None
    pub fn hours_left(&self, now: DateTime<Utc>) -> Option<i64> {
        let expires_at = self.expires_at?;
        if now > expires_at {
            return None;
        }
        let secs = (expires_at - now).num_seconds();
        Some((secs + 3599) / 3600)
    }

    /// 构造领取后的文档，claimedBy/claimedAt/expiresAt 在同一次写入中落盘
    pub fn claim(&self, user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            status: ItemStatus::Claimed,
            claimed_by: Some(user_id.to_string()),
            claimed_at: Some(now),
            expires_at: Some(now + Duration::days(i64::from(self.duration_days))),
            expiry_notified: false,
            ..self.clone()
        }
    }

    /// 领取的逆操作，只在扣款失败的补偿中使用
    pub fn unclaim(&self) -> Self {
        Self {
            status: ItemStatus::Unclaimed,
            claimed_by: None,
            claimed_at: None,
            expires_at: None,
            expiry_notified: false,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> InventoryItem {
        InventoryItem::new("k1", "pro-a", 7, "AAAA-BBBB", Utc::now())
    }

    #[test]
    fn test_claim_sets_expiry() {
        let now = Utc::now();
        let claimed = item().claim("u1", now);
        assert_eq!(claimed.status, ItemStatus::Claimed);
        assert_eq!(claimed.claimed_by.as_deref(), Some("u1"));
        assert_eq!(claimed.expires_at, Some(now + Duration::days(7)));
    }

    #[test]
    fn test_is_expired_is_strict() {
        let now = Utc::now();
        let claimed = item().claim("u1", now);
        let expires_at = claimed.expires_at.unwrap();

        assert!(!claimed.is_expired(expires_at));
        assert!(claimed.is_expired(expires_at + Duration::seconds(1)));
        assert!(!item().is_expired(now + Duration::days(365)));
    }

    #[test]
    fn test_hours_left_rounds_up() {
        let now = Utc::now();
        let claimed = item().claim("u1", now);
        let later = claimed.expires_at.unwrap() - Duration::minutes(90);
        assert_eq!(claimed.hours_left(later), Some(2));
        assert_eq!(claimed.hours_left(claimed.expires_at.unwrap() + Duration::seconds(1)), None);
    }
}
