//! 客服人员名单

use chrono::Utc;
use tracing::{info, instrument};

use crate::error::{Result, RewardsError};
use crate::models::SupportStaff;
use crate::store::{Store, StorePath, paths};

#[derive(Clone)]
pub struct StaffRegistry {
    store: Store,
    admin_ids: Vec<String>,
    max_attempts: u32,
}

impl StaffRegistry {
    pub fn new(store: Store, admin_ids: Vec<String>, max_attempts: u32) -> Self {
        Self {
            store,
            admin_ids,
            max_attempts,
        }
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_ids.iter().any(|id| id == user_id)
    }

    /// 在职客服或管理员
    pub async fn is_staff(&self, user_id: &str) -> Result<bool> {
        if self.is_admin(user_id) {
            return Ok(true);
        }
        Ok(self
            .store
            .get::<SupportStaff>(&StorePath::staff(user_id))
            .await?
            .is_some_and(|v| v.value.is_active))
    }

    /// 添加客服，已存在时重新启用
    #[instrument(skip(self))]
    pub async fn add_staff(&self, staff_id: &str, name: &str) -> Result<SupportStaff> {
        let staff = self
            .store
            .update_with(
                &StorePath::staff(staff_id),
                self.max_attempts,
                |current: Option<SupportStaff>| {
                    let mut staff = current.unwrap_or_else(|| SupportStaff {
                        id: staff_id.to_string(),
                        name: name.to_string(),
                        is_active: true,
                        added_at: Utc::now(),
                    });
                    if !name.is_empty() {
                        staff.name = name.to_string();
                    }
                    staff.is_active = true;
                    Ok(staff)
                },
            )
            .await?;
        info!(staff_id, "客服已添加");
        Ok(staff)
    }

    #[instrument(skip(self))]
    pub async fn remove_staff(&self, staff_id: &str) -> Result<()> {
        if self
            .store
            .get::<SupportStaff>(&StorePath::staff(staff_id))
            .await?
            .is_none()
        {
            return Err(RewardsError::Validation(format!("客服不存在: {}", staff_id)));
        }
        self.store.delete(&StorePath::staff(staff_id)).await?;
        info!(staff_id, "客服已移除");
        Ok(())
    }

    pub async fn set_staff_active(&self, staff_id: &str, active: bool) -> Result<SupportStaff> {
        self.store
            .update_with(
                &StorePath::staff(staff_id),
                self.max_attempts,
                |current: Option<SupportStaff>| {
                    let mut staff = current.ok_or_else(|| {
                        RewardsError::Validation(format!("客服不存在: {}", staff_id))
                    })?;
                    staff.is_active = active;
                    Ok(staff)
                },
            )
            .await
    }

    /// 所有客服，按添加时间排序
    pub async fn list_staff(&self) -> Result<Vec<SupportStaff>> {
        let mut staff: Vec<SupportStaff> = self
            .store
            .list::<SupportStaff>(paths::STAFF)
            .await?
            .into_iter()
            .map(|v| v.into_inner())
            .collect();
        staff.sort_by(|a, b| a.added_at.cmp(&b.added_at).then(a.id.cmp(&b.id)));
        Ok(staff)
    }

    /// 新请求需要通知的账号：在职客服与管理员，去重
    pub async fn notify_targets(&self) -> Result<Vec<String>> {
        let mut targets: Vec<String> = self
            .list_staff()
            .await?
            .into_iter()
            .filter(|s| s.is_active)
            .map(|s| s.id)
            .collect();
        for admin in &self.admin_ids {
            if !targets.contains(admin) {
                targets.push(admin.clone());
            }
        }
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_staff_lifecycle() {
        let registry = StaffRegistry::new(Store::memory(), vec!["admin".to_string()], 5);
        registry.add_staff("s1", "Alice").await.unwrap();
        registry.add_staff("s2", "Bob").await.unwrap();
        registry.set_staff_active("s2", false).await.unwrap();

        assert!(registry.is_staff("s1").await.unwrap());
        assert!(!registry.is_staff("s2").await.unwrap());
        assert!(registry.is_staff("admin").await.unwrap());
        assert!(!registry.is_staff("u1").await.unwrap());

        assert_eq!(registry.notify_targets().await.unwrap(), vec!["s1", "admin"]);

        registry.remove_staff("s1").await.unwrap();
        assert_eq!(registry.list_staff().await.unwrap().len(), 1);
        assert!(matches!(
            registry.remove_staff("s1").await,
            Err(RewardsError::Validation(_))
        ));
    }
}
