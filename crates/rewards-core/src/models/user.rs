use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// VIP 等级
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VipTier {
    Silver,
    #[default]
    Gold,
    Platinum,
}

/// 用户
///
/// 首次接触时创建，之后只会被软标记（封禁、拉黑），不会物理删除。
/// `balance` 只由积分账本写入。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub balance: u64,
    #[serde(default)]
    pub total_earned: u64,
    #[serde(default)]
    pub total_spent: u64,
    #[serde(default)]
    pub referred_by: Option<String>,
    #[serde(default)]
    pub referral_claimed: bool,
    #[serde(default)]
    pub total_referrals: u64,
    #[serde(default)]
    pub is_banned: bool,
    /// 用户屏蔽了机器人，广播时不再投递
    #[serde(default)]
    pub is_blocked: bool,
    #[serde(default)]
    pub blocked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub vip_tier: Option<VipTier>,
    pub joined_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    #[serde(default)]
    pub last_daily_reward: Option<DateTime<Utc>>,
    #[serde(default)]
    pub daily_streak: u32,
}

impl User {
    pub fn new(profile: &UserProfile, now: DateTime<Utc>) -> Self {
        Self {
            id: profile.id.clone(),
            name: profile.name.clone(),
            username: profile.username.clone(),
            balance: 0,
            total_earned: 0,
            total_spent: 0,
            referred_by: None,
            referral_claimed: false,
            total_referrals: 0,
            is_banned: false,
            is_blocked: false,
            blocked_at: None,
            vip_tier: None,
            joined_at: now,
            last_active: now,
            last_daily_reward: None,
            daily_streak: 0,
        }
    }

    pub fn is_vip(&self) -> bool {
        self.vip_tier.is_some()
    }

    /// 最近一次活跃是否在窗口内
    pub fn active_since(&self, since: DateTime<Utc>) -> bool {
        self.last_active >= since
    }
}

/// 消息通道提供的用户资料
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
}

impl UserProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            username: None,
        }
    }
}

/// 预先封禁记录
///
/// 管理员可以封禁尚未与机器人交互过的 ID，用户创建时生效。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBan {
    pub user_id: String,
    pub banned_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_defaults() {
        let now = Utc::now();
        let user = User::new(&UserProfile::new("42", "Alice"), now);
        assert_eq!(user.balance, 0);
        assert!(!user.referral_claimed);
        assert!(!user.is_vip());
        assert_eq!(user.joined_at, now);
    }

    #[test]
    fn test_deserialize_sparse_document() {
        // 旧数据可能缺少大部分字段
        let json = serde_json::json!({
            "id": "7",
            "joinedAt": "2024-01-01T00:00:00Z",
            "lastActive": "2024-01-02T00:00:00Z",
            "vipTier": "gold"
        });
        let user: User = serde_json::from_value(json).unwrap();
        assert_eq!(user.vip_tier, Some(VipTier::Gold));
        assert_eq!(user.total_referrals, 0);
    }
}
