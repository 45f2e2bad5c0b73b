//! 进程内存储后端
//!
//! 基于 DashMap 实现，单个键上的 CAS 在分片锁内完成，
//! 用于本地开发、单实例部署和测试。

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;

use super::backend::{KvBackend, StoreError};
use super::paths::is_direct_child;

/// 进程内存储
///
/// Clone 共享同一份数据
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<DashMap<String, Value>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.data.get(path).map(|v| v.value().clone()))
    }

    async fn put(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.data.insert(path.to_string(), value);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        path: &str,
        expected: Option<Value>,
        new: Value,
    ) -> Result<bool, StoreError> {
        match (self.data.entry(path.to_string()), expected) {
            (Entry::Vacant(slot), None) => {
                slot.insert(new);
                Ok(true)
            }
            (Entry::Occupied(mut slot), Some(expected)) if *slot.get() == expected => {
                slot.insert(new);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.data.remove(path);
        Ok(())
    }

    async fn compare_and_delete(&self, path: &str, expected: Value) -> Result<bool, StoreError> {
        Ok(self
            .data
            .remove_if(path, |_, current| *current == expected)
            .is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>, StoreError> {
        Ok(self
            .data
            .iter()
            .filter(|entry| is_direct_child(prefix, entry.key()))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }
}
