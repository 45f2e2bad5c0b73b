//! 集成测试公共工具

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fake::Fake;
use fake::faker::name::en::Name;
use rand::Rng;
use serde_json::Value;

use rewards_core::store::{KvBackend, MemoryBackend, Store, StoreError, StorePath};
use rewards_shared::retry::RetryPolicy;
use rewards_core::transport::{ChatTransport, SendOptions, TransportError};
use rewards_core::{User, UserProfile};

/// 记录所有发出消息的消息通道
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<(String, String)>>,
    pub sends: AtomicUsize,
    pub delay: Duration,
    pub member: bool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            member: true,
            ..Default::default()
        })
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            member: true,
            ..Default::default()
        })
    }

    pub fn count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn messages_to(&self, user_id: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == user_id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send_message(
        &self,
        user_id: &str,
        text: &str,
        _options: &SendOptions,
    ) -> Result<(), TransportError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.sent
            .lock()
            .unwrap()
            .push((user_id.to_string(), text.to_string()));
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_member(&self, _channel_id: &str, _user_id: &str) -> Result<bool, TransportError> {
        Ok(self.member)
    }
}

/// 写入一个带余额的用户
pub async fn seed_user(store: &Store, id: &str, balance: u64) -> User {
    let name: String = Name().fake();
    let mut user = User::new(&UserProfile::new(id, name), Utc::now());
    user.balance = balance;
    store.put(&StorePath::user(id), &user).await.unwrap();
    user
}

pub async fn load_user(store: &Store, id: &str) -> User {
    store
        .get::<User>(&StorePath::user(id))
        .await
        .unwrap()
        .unwrap()
        .into_inner()
}

/// 每次调用前随机等待 0-2ms 的内存后端，用来放大并发交错
#[derive(Default)]
pub struct JitterBackend {
    inner: MemoryBackend,
}

impl JitterBackend {
    pub fn store() -> Store {
        Store::new(Arc::new(Self::default()), RetryPolicy::default())
    }

    async fn jitter(&self) {
        let micros = rand::rng().random_range(0..2000);
        tokio::time::sleep(Duration::from_micros(micros)).await;
    }
}

#[async_trait]
impl KvBackend for JitterBackend {
    fn name(&self) -> &'static str {
        "jitter"
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        self.jitter().await;
        self.inner.get(path).await
    }

    async fn put(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.jitter().await;
        self.inner.put(path, value).await
    }

    async fn compare_and_swap(
        &self,
        path: &str,
        expected: Option<Value>,
        new: Value,
    ) -> Result<bool, StoreError> {
        self.jitter().await;
        self.inner.compare_and_swap(path, expected, new).await
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.jitter().await;
        self.inner.delete(path).await
    }

    async fn compare_and_delete(&self, path: &str, expected: Value) -> Result<bool, StoreError> {
        self.jitter().await;
        self.inner.compare_and_delete(path, expected).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>, StoreError> {
        self.jitter().await;
        self.inner.list(prefix).await
    }
}
