//! 存储后端抽象
//!
//! 后端只提供单路径原语，远端存储本身不支持多键事务，
//! 上层的所有正确性都建立在单路径 CAS 之上。

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// 存储后端错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 网络抖动、连接中断等瞬时故障，可以重试
    #[error("存储暂时不可用: {0}")]
    Unavailable(String),

    #[error("存储文档无法解析: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// 键值存储后端
///
/// 路径为 `/` 分隔的层级键（如 `users/42`），值为 JSON 文档。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// 后端名称（用于日志）
    fn name(&self) -> &'static str;

    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    async fn put(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// 条件写入
    ///
    /// 仅当当前值与 `expected` 完全相等时写入 `new`；`expected` 为 None 表示
    /// 期望路径不存在。返回是否写入成功。
    async fn compare_and_swap(
        &self,
        path: &str,
        expected: Option<Value>,
        new: Value,
    ) -> Result<bool, StoreError>;

    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// 条件删除
    ///
    /// 仅当当前值与 `expected` 完全相等时删除，返回是否删除。
    async fn compare_and_delete(&self, path: &str, expected: Value) -> Result<bool, StoreError>;

    /// 列出 `prefix` 下的直接子节点，返回 (完整路径, 值)
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>, StoreError>;
}
