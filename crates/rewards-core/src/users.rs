//! 用户服务
//!
//! 首次接触建档、封禁与 VIP 标记。这些字段与余额无关，
//! 但仍然通过 CAS 写入，避免覆盖账本的并发修改。

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::error::{Result, RewardsError};
use crate::models::{Page, User, UserBan, UserProfile, VipTier};
use crate::store::{Store, StorePath, paths};

/// 用户服务
#[derive(Clone)]
pub struct UserService {
    store: Store,
    max_attempts: u32,
}

impl UserService {
    pub fn new(store: Store, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts,
        }
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<User>> {
        Ok(self
            .store
            .get::<User>(&StorePath::user(user_id))
            .await?
            .map(|v| v.into_inner()))
    }

    pub async fn require(&self, user_id: &str) -> Result<User> {
        self.get(user_id)
            .await?
            .ok_or_else(|| RewardsError::UserNotFound(user_id.to_string()))
    }

    /// 所有用户（顺序不保证）
    pub async fn list(&self) -> Result<Vec<User>> {
        Ok(self
            .store
            .list::<User>(paths::USERS)
            .await?
            .into_iter()
            .map(|v| v.into_inner())
            .collect())
    }

    /// 分页列出用户，按建档时间从新到旧
    pub async fn list_page(&self, page: u32, page_size: u32) -> Result<Page<User>> {
        let mut users = self.list().await?;
        users.sort_by(|a, b| b.joined_at.cmp(&a.joined_at).then(a.id.cmp(&b.id)));
        Ok(Page::slice(users, page, page_size))
    }

    /// 首次接触时建档，之后刷新资料与活跃时间
    ///
    /// 返回 (用户, 是否新建)。预先封禁的 ID 在建档时直接带上封禁标记。
    #[instrument(skip(self, profile), fields(user_id = %profile.id))]
    pub async fn ensure_user(&self, profile: &UserProfile) -> Result<(User, bool)> {
        self.ensure_user_at(profile, Utc::now()).await
    }

    pub(crate) async fn ensure_user_at(
        &self,
        profile: &UserProfile,
        now: DateTime<Utc>,
    ) -> Result<(User, bool)> {
        let path = StorePath::user(&profile.id);

        for _ in 0..self.max_attempts.max(1) {
            if self.store.get::<User>(&path).await?.is_some() {
                let user = self.touch(profile, now).await?;
                return Ok((user, false));
            }

            let mut user = User::new(profile, now);
            if self
                .store
                .get::<UserBan>(&StorePath::ban(&profile.id))
                .await?
                .is_some()
            {
                user.is_banned = true;
            }

            if self.store.create(&path, &user).await? {
                info!(user_id = %user.id, banned = user.is_banned, "新用户已建档");
                return Ok((user, true));
            }
            // 并发建档失败，下一轮走刷新分支
        }

        Err(RewardsError::Contention { path })
    }

    /// 刷新资料与活跃时间
    async fn touch(&self, profile: &UserProfile, now: DateTime<Utc>) -> Result<User> {
        self.store
            .update_with(
                &StorePath::user(&profile.id),
                self.max_attempts,
                |current: Option<User>| {
                    let mut user = current
                        .ok_or_else(|| RewardsError::UserNotFound(profile.id.clone()))?;
                    if !profile.name.is_empty() {
                        user.name = profile.name.clone();
                    }
                    if profile.username.is_some() {
                        user.username = profile.username.clone();
                    }
                    user.last_active = now;
                    Ok(user)
                },
            )
            .await
    }

    /// 封禁 / 解封
    ///
    /// 用户尚未建档时写入预先封禁记录。返回用户是否已建档。
    #[instrument(skip(self))]
    pub async fn set_banned(&self, user_id: &str, banned: bool) -> Result<bool> {
        let path = StorePath::user(user_id);
        let ban_path = StorePath::ban(user_id);

        if self.store.get::<User>(&path).await?.is_none() {
            if banned {
                self.store
                    .put(
                        &ban_path,
                        &UserBan {
                            user_id: user_id.to_string(),
                            banned_at: Utc::now(),
                        },
                    )
                    .await?;
            } else {
                self.store.delete(&ban_path).await?;
            }
            info!(user_id, banned, "已记录预先封禁状态");
            return Ok(false);
        }

        self.store
            .update_with(&path, self.max_attempts, |current: Option<User>| {
                let mut user =
                    current.ok_or_else(|| RewardsError::UserNotFound(user_id.to_string()))?;
                user.is_banned = banned;
                Ok(user)
            })
            .await?;
        if !banned {
            self.store.delete(&ban_path).await?;
        }

        info!(user_id, banned, "用户封禁状态已更新");
        Ok(true)
    }

    /// 设置 / 取消 VIP
    #[instrument(skip(self))]
    pub async fn set_vip(&self, user_id: &str, tier: Option<VipTier>) -> Result<User> {
        let user = self
            .store
            .update_with(
                &StorePath::user(user_id),
                self.max_attempts,
                |current: Option<User>| {
                    let mut user =
                        current.ok_or_else(|| RewardsError::UserNotFound(user_id.to_string()))?;
                    user.vip_tier = tier;
                    Ok(user)
                },
            )
            .await?;
        info!(user_id, vip_tier = ?tier, "用户 VIP 等级已更新");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use fake::Fake;
    use fake::faker::name::en::Name;

    fn service() -> UserService {
        UserService::new(Store::memory(), 10)
    }

    fn profile(id: &str) -> UserProfile {
        UserProfile::new(id, Name().fake::<String>())
    }

    #[tokio::test]
    async fn test_ensure_user_creates_then_touches() {
        let service = service();
        let now = Utc::now();

        let (user, created) = service.ensure_user_at(&profile("1"), now).await.unwrap();
        assert!(created);
        assert_eq!(user.joined_at, now);

        let later = now + Duration::hours(1);
        let (user, created) = service.ensure_user_at(&profile("1"), later).await.unwrap();
        assert!(!created);
        assert_eq!(user.joined_at, now);
        assert_eq!(user.last_active, later);
    }

    #[tokio::test]
    async fn test_preemptive_ban_applies_on_creation() {
        let service = service();
        assert!(!service.set_banned("9", true).await.unwrap());

        let (user, created) = service.ensure_user(&profile("9")).await.unwrap();
        assert!(created);
        assert!(user.is_banned);
    }

    #[tokio::test]
    async fn test_unban_existing_user() {
        let service = service();
        service.ensure_user(&profile("3")).await.unwrap();
        assert!(service.set_banned("3", true).await.unwrap());
        assert!(service.require("3").await.unwrap().is_banned);

        service.set_banned("3", false).await.unwrap();
        assert!(!service.require("3").await.unwrap().is_banned);
    }

    #[tokio::test]
    async fn test_set_vip() {
        let service = service();
        service.ensure_user(&profile("5")).await.unwrap();
        let user = service.set_vip("5", Some(VipTier::Gold)).await.unwrap();
        assert!(user.is_vip());
        let user = service.set_vip("5", None).await.unwrap();
        assert!(!user.is_vip());

        assert!(matches!(
            service.set_vip("404", Some(VipTier::Gold)).await,
            Err(RewardsError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_page_newest_first() {
        let service = service();
        let now = Utc::now();
        for i in 0..5 {
            service
                .ensure_user_at(&profile(&i.to_string()), now + Duration::minutes(i))
                .await
                .unwrap();
        }

        let page = service.list_page(1, 2).await.unwrap();
        assert_eq!(page.total, 5);
        let ids: Vec<&str> = page.items.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["4", "3"]);

        let last = service.list_page(3, 2).await.unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].id, "0");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_contact_creates_once() {
        let service = service();
        let mut tasks = Vec::new();
        for _ in 0..6 {
            let service = service.clone();
            tasks.push(tokio::spawn(async move {
                service.ensure_user(&UserProfile::new("7", "Bob")).await
            }));
        }
        let mut created = 0;
        for task in tasks {
            if task.await.unwrap().unwrap().1 {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }
}
