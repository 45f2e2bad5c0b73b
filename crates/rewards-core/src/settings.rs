//! 运营设置读写

use tracing::info;

use crate::error::Result;
use crate::models::Settings;
use crate::store::{Store, StorePath};

/// 设置访问入口
///
/// 每次调用都从存储读取，不做进程内缓存
#[derive(Clone)]
pub struct SettingsService {
    store: Store,
}

impl SettingsService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// 当前设置，不存在时返回默认值
    pub async fn current(&self) -> Result<Settings> {
        Ok(self
            .store
            .get::<Settings>(&StorePath::settings())
            .await?
            .map(|v| v.into_inner())
            .unwrap_or_default())
    }

    /// 修改设置
    pub async fn update<F>(&self, mut f: F) -> Result<Settings>
    where
        F: FnMut(&mut Settings),
    {
        let settings = self
            .store
            .update_with(&StorePath::settings(), 5, |current: Option<Settings>| {
                let mut settings = current.unwrap_or_default();
                f(&mut settings);
                Ok(settings)
            })
            .await?;
        info!(
            claiming_enabled = settings.claiming_enabled,
            maintenance_mode = settings.maintenance_mode,
            "运营设置已更新"
        );
        Ok(settings)
    }
}
