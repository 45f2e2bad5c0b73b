//! 存储适配层
//!
//! 把远端键值存储抽象为带类型的 get / put / patch / compareAndSwap / 条件删除操作。
//!
//! ## 设计说明
//!
//! - 后端（[`KvBackend`]）只提供单路径原语，瞬时故障在本层按指数退避重试，
//!   耗尽后返回 [`RewardsError::StoreUnavailable`]
//! - 读取返回 [`Versioned`]，保留读取时的原始文档；CAS 的期望值总是这份原始文档，
//!   不会因为重新序列化产生差异
//! - [`Store::update_with`] 实现 "读取 -> 计算 -> 对读取值 CAS -> 不匹配则重读" 的乐观循环，
//!   上层所有余额、状态字段的写入都经由它或显式 CAS 完成

mod backend;
mod memory;
pub mod paths;
mod redis;

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use rewards_shared::config::{RedisConfig, StoreBackendKind, StoreConfig};
use rewards_shared::observability::metrics;
use rewards_shared::retry::{RetryPolicy, retry_with_policy};

use crate::error::{Result, RewardsError};

pub use backend::{KvBackend, StoreError};
#[cfg(test)]
pub use backend::MockKvBackend;
pub use memory::MemoryBackend;
pub use paths::StorePath;
pub use redis::RedisBackend;

/// patch 内部 CAS 循环的最大尝试次数
const PATCH_MAX_ATTEMPTS: u32 = 5;

/// 带原始文档的读取结果
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub value: T,
    raw: Value,
}

impl<T> Versioned<T> {
    /// 读取时的原始文档，作为 CAS 的期望值
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T: Serialize> Versioned<T> {
    /// 以本次成功写入的值构造，原始文档即写入的文档
    pub fn written(value: T) -> Result<Self> {
        let raw = serde_json::to_value(&value)?;
        Ok(Self { value, raw })
    }
}

/// 带类型的存储访问入口
///
/// Clone 共享同一个后端
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn KvBackend>,
    retry: RetryPolicy,
}

impl Store {
    pub fn new(backend: Arc<dyn KvBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// 进程内存储，使用默认重试策略
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), RetryPolicy::default())
    }

    /// 按配置创建存储
    pub fn from_config(store: &StoreConfig, redis: &RedisConfig) -> Result<Self> {
        let backend: Arc<dyn KvBackend> = match store.backend {
            StoreBackendKind::Memory => Arc::new(MemoryBackend::new()),
            StoreBackendKind::Redis => Arc::new(RedisBackend::new(redis)?),
        };
        Ok(Self::new(backend, store.retry_policy()))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, StoreError>>,
    {
        retry_with_policy(&self.retry, operation, StoreError::is_transient, op)
            .await
            .map_err(RewardsError::from)
    }

    /// 读取原始文档
    pub async fn get_raw(&self, path: &str) -> Result<Option<Value>> {
        self.with_retry("store.get", || self.backend.get(path)).await
    }

    /// 读取并解码
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<Versioned<T>>> {
        match self.get_raw(path).await? {
            Some(raw) => Ok(Some(decode(raw)?)),
            None => Ok(None),
        }
    }

    /// 无条件写入
    ///
    /// 只用于创建者独占的新实体或不参与并发写的文档，共享字段必须走 CAS
    pub async fn put<T: Serialize>(&self, path: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.with_retry("store.put", || self.backend.put(path, value.clone()))
            .await
    }

    /// 条件写入（原始文档）
    ///
    /// 如果上一次尝试遇到瞬时故障而本次返回不匹配，写入可能已经在服务端生效，
    /// 此时回读确认当前值是否就是本次要写的值。
    pub async fn compare_and_swap_raw(
        &self,
        path: &str,
        expected: Option<&Value>,
        new: Value,
    ) -> Result<bool> {
        // 只有上一次尝试以瞬时故障结束时才会再次调用闭包
        let mut attempted = false;
        let swapped = self
            .with_retry("store.cas", || {
                let attempt = self
                    .backend
                    .compare_and_swap(path, expected.cloned(), new.clone());
                let retried = attempted;
                attempted = true;
                async move { attempt.await.map(|ok| (ok, retried)) }
            })
            .await?;

        match swapped {
            (true, _) => Ok(true),
            (false, false) => Ok(false),
            (false, true) => {
                let current = self.get_raw(path).await?;
                let landed = current.as_ref() == Some(&new);
                if landed {
                    debug!(path, "CAS 在瞬时故障后已生效");
                }
                Ok(landed)
            }
        }
    }

    /// 条件写入
    ///
    /// `expected` 为 None 表示期望路径不存在（创建）
    pub async fn compare_and_swap<T: Serialize>(
        &self,
        path: &str,
        expected: Option<&Versioned<T>>,
        new: &T,
    ) -> Result<bool> {
        let new = serde_json::to_value(new)?;
        let swapped = self
            .compare_and_swap_raw(path, expected.map(Versioned::raw), new)
            .await?;
        if !swapped {
            metrics::record_cas_conflict(StorePath::entity(path));
        }
        Ok(swapped)
    }

    /// 仅在不存在时创建
    pub async fn create<T: Serialize>(&self, path: &str, value: &T) -> Result<bool> {
        self.compare_and_swap::<T>(path, None, value).await
    }

    /// 合并字段
    ///
    /// 对路径上的文档合并 `fields`（浅合并），内部为 CAS 循环，路径不存在时创建
    pub async fn patch(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        for _ in 0..PATCH_MAX_ATTEMPTS {
            let current = self.get_raw(path).await?;
            let mut merged = match &current {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            };
            for (key, value) in &fields {
                merged.insert(key.clone(), value.clone());
            }
            if self
                .compare_and_swap_raw(path, current.as_ref(), Value::Object(merged))
                .await?
            {
                return Ok(());
            }
            metrics::record_cas_conflict(StorePath::entity(path));
        }
        Err(RewardsError::Contention {
            path: path.to_string(),
        })
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.with_retry("store.delete", || self.backend.delete(path))
            .await
    }

    /// 条件删除（原始文档）
    ///
    /// 仅当当前文档仍等于 `expected` 时删除。瞬时故障后的重试返回不匹配时，
    /// 回读确认文档是否已经不存在。
    pub async fn delete_if_raw(&self, path: &str, expected: &Value) -> Result<bool> {
        let mut attempted = false;
        let deleted = self
            .with_retry("store.delete_if", || {
                let attempt = self.backend.compare_and_delete(path, expected.clone());
                let retried = attempted;
                attempted = true;
                async move { attempt.await.map(|ok| (ok, retried)) }
            })
            .await?;

        match deleted {
            (true, _) => Ok(true),
            (false, false) => Ok(false),
            (false, true) => Ok(self.get_raw(path).await?.is_none()),
        }
    }

    /// 条件删除：仅当文档自读取后未被修改
    pub async fn delete_if_unchanged<T>(&self, path: &str, expected: &Versioned<T>) -> Result<bool> {
        let deleted = self.delete_if_raw(path, expected.raw()).await?;
        if !deleted {
            metrics::record_cas_conflict(StorePath::entity(path));
        }
        Ok(deleted)
    }

    /// 列出前缀下的直接子节点
    ///
    /// 无法解码的文档记录告警后跳过，不影响其余结果。返回顺序不保证。
    pub async fn list<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<Versioned<T>>> {
        let children = self
            .with_retry("store.list", || self.backend.list(prefix))
            .await?;

        let mut decoded = Vec::with_capacity(children.len());
        for (path, raw) in children {
            match decode(raw) {
                Ok(item) => decoded.push(item),
                Err(e) => warn!(path = %path, error = %e, "跳过无法解析的文档"),
            }
        }
        Ok(decoded)
    }

    /// 乐观并发更新
    ///
    /// `f` 接收当前值（不存在为 None），返回要写入的新值；返回错误则中止且不写入。
    /// CAS 不匹配时重读重算，最多 `max_attempts` 次，耗尽后返回
    /// [`RewardsError::Contention`]。返回最终写入的值。
    pub async fn update_with<T, F>(&self, path: &str, max_attempts: u32, mut f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(Option<T>) -> Result<T>,
    {
        for attempt in 0..max_attempts.max(1) {
            let current: Option<Versioned<T>> = self.get(path).await?;
            let expected = current.as_ref().map(|v| v.raw.clone());
            let next = f(current.map(Versioned::into_inner))?;
            let next_raw = serde_json::to_value(&next)?;

            if expected.as_ref() == Some(&next_raw) {
                return Ok(next);
            }
            if self
                .compare_and_swap_raw(path, expected.as_ref(), next_raw)
                .await?
            {
                return Ok(next);
            }

            metrics::record_cas_conflict(StorePath::entity(path));
            debug!(path, attempt, "CAS 冲突，重新读取");
        }

        warn!(path, max_attempts, "乐观更新重试次数耗尽");
        Err(RewardsError::Contention {
            path: path.to_string(),
        })
    }
}

fn decode<T: DeserializeOwned>(raw: Value) -> Result<Versioned<T>> {
    let value = serde_json::from_value(raw.clone())?;
    Ok(Versioned { value, raw })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        n: u64,
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_get_put_roundtrip() {
        let store = Store::memory();
        store.put("c/1", &Counter { n: 3 }).await.unwrap();

        let read: Versioned<Counter> = store.get("c/1").await.unwrap().unwrap();
        assert_eq!(read.value, Counter { n: 3 });
        assert_eq!(read.raw(), &json!({"n": 3}));
        assert!(store.get::<Counter>("c/2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cas_against_stale_read_fails() {
        let store = Store::memory();
        store.put("c/1", &Counter { n: 1 }).await.unwrap();
        let stale: Versioned<Counter> = store.get("c/1").await.unwrap().unwrap();

        store.put("c/1", &Counter { n: 2 }).await.unwrap();
        let swapped = store
            .compare_and_swap("c/1", Some(&stale), &Counter { n: 10 })
            .await
            .unwrap();
        assert!(!swapped);
    }

    #[tokio::test]
    async fn test_patch_merges_fields() {
        let store = Store::memory();
        store.put("u/1", &json!({"a": 1, "b": 2})).await.unwrap();

        let mut fields = Map::new();
        fields.insert("b".to_string(), json!(3));
        fields.insert("c".to_string(), json!(true));
        store.patch("u/1", fields).await.unwrap();

        assert_eq!(
            store.get_raw("u/1").await.unwrap(),
            Some(json!({"a": 1, "b": 3, "c": true}))
        );
    }

    #[tokio::test]
    async fn test_delete_if_unchanged_skips_replaced_doc() {
        let store = Store::memory();
        store.put("c/1", &Counter { n: 1 }).await.unwrap();
        let stale: Versioned<Counter> = store.get("c/1").await.unwrap().unwrap();

        store.put("c/1", &Counter { n: 2 }).await.unwrap();
        assert!(!store.delete_if_unchanged("c/1", &stale).await.unwrap());
        assert_eq!(store.get_raw("c/1").await.unwrap(), Some(json!({"n": 2})));

        let fresh: Versioned<Counter> = store.get("c/1").await.unwrap().unwrap();
        assert!(store.delete_if_unchanged("c/1", &fresh).await.unwrap());
        assert!(store.get_raw("c/1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_written_matches_stored_doc() {
        let store = Store::memory();
        assert!(store.create("c/1", &Counter { n: 7 }).await.unwrap());
        let written = Versioned::written(Counter { n: 7 }).unwrap();
        assert!(store.delete_if_unchanged("c/1", &written).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_with_aborts_without_writing() {
        let store = Store::memory();
        store.put("c/1", &Counter { n: 1 }).await.unwrap();

        let result = store
            .update_with("c/1", 5, |_: Option<Counter>| {
                Err(RewardsError::Validation("拒绝".to_string()))
            })
            .await;
        assert!(matches!(result, Err(RewardsError::Validation(_))));
        assert_eq!(store.get_raw("c/1").await.unwrap(), Some(json!({"n": 1})));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_update_with_concurrent_increments() {
        let store = Store::memory();
        store.put("c/1", &Counter { n: 0 }).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .update_with("c/1", 100, |c: Option<Counter>| {
                        Ok(Counter {
                            n: c.map_or(0, |c| c.n) + 1,
                        })
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let final_value: Versioned<Counter> = store.get("c/1").await.unwrap().unwrap();
        assert_eq!(final_value.value.n, 20);
    }

    #[tokio::test]
    async fn test_update_with_contention_exhausted() {
        let mut backend = MockKvBackend::new();
        backend.expect_get().returning(|_| Ok(Some(json!({"n": 1}))));
        backend
            .expect_compare_and_swap()
            .times(3)
            .returning(|_, _, _| Ok(false));
        let store = Store::new(Arc::new(backend), fast_retry());

        let result = store
            .update_with("c/1", 3, |c: Option<Counter>| {
                Ok(Counter {
                    n: c.map_or(0, |c| c.n) + 1,
                })
            })
            .await;
        assert!(matches!(result, Err(RewardsError::Contention { .. })));
    }

    #[tokio::test]
    async fn test_transient_errors_exhaust_to_store_unavailable() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut backend = MockKvBackend::new();
        backend.expect_get().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("connection reset".to_string()))
        });
        let store = Store::new(Arc::new(backend), fast_retry());

        let result = store.get::<Counter>("c/1").await;
        assert!(matches!(result, Err(RewardsError::StoreUnavailable(_))));
        // 首次执行 + 2 次重试
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cas_landed_despite_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut backend = MockKvBackend::new();
        // 第一次写入在服务端生效但响应丢失，第二次因值已变化返回不匹配
        backend.expect_compare_and_swap().returning(move |_, _, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StoreError::Unavailable("timeout".to_string()))
            } else {
                Ok(false)
            }
        });
        backend.expect_get().returning(|_| Ok(Some(json!({"n": 2}))));
        let store = Store::new(Arc::new(backend), fast_retry());

        let swapped = store
            .compare_and_swap_raw("c/1", Some(&json!({"n": 1})), json!({"n": 2}))
            .await
            .unwrap();
        assert!(swapped);
    }
}
