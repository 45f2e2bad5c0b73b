//! Redis 存储后端
//!
//! 每个路径对应一个字符串键，值为 JSON 文本。CAS 通过 Lua 脚本在服务端
//! 原子比较并写入；期望值取自读取时的原始文本，因此字节级比较是稳定的。

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde_json::Value;
use tracing::{debug, info, instrument};

use rewards_shared::config::RedisConfig;

use super::backend::{KvBackend, StoreError};
use super::paths::is_direct_child;

/// 比较并写入
///
/// ARGV[1]: "absent" 表示期望键不存在，"match" 表示期望值等于 ARGV[2]
/// ARGV[3]: 新值
const CAS_SCRIPT: &str = r#"
    local current = redis.call("GET", KEYS[1])
    if ARGV[1] == "absent" then
        if current then
            return 0
        end
    elseif current ~= ARGV[2] then
        return 0
    end
    redis.call("SET", KEYS[1], ARGV[3])
    return 1
"#;

/// 比较并删除，ARGV[1] 为期望值
const CAD_SCRIPT: &str = r#"
    if redis.call("GET", KEYS[1]) ~= ARGV[1] then
        return 0
    end
    redis.call("DEL", KEYS[1])
    return 1
"#;

/// 每轮 SCAN 的建议数量
const SCAN_COUNT: usize = 200;

/// Redis 存储后端
#[derive(Clone)]
pub struct RedisBackend {
    client: Client,
    key_prefix: String,
}

impl RedisBackend {
    /// 创建 Redis 客户端
    pub fn new(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.url.as_str())?;
        info!(key_prefix = %config.key_prefix, "Redis store client created");
        Ok(Self {
            client,
            key_prefix: config.key_prefix.clone(),
        })
    }

    async fn get_conn(&self) -> Result<MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(StoreError::from)
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.get_conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(StoreError::from)
    }

    fn key(&self, path: &str) -> String {
        if self.key_prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}:{}", self.key_prefix, path)
        }
    }

    fn path_of<'a>(&self, key: &'a str) -> &'a str {
        if self.key_prefix.is_empty() {
            return key;
        }
        key.strip_prefix(self.key_prefix.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(key)
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    #[instrument(skip(self))]
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let mut conn = self.get_conn().await?;
        let raw: Option<String> = conn.get(self.key(path)).await?;
        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, value))]
    async fn put(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let mut conn = self.get_conn().await?;
        let text = serde_json::to_string(&value)?;
        let _: () = conn.set(self.key(path), text).await?;
        Ok(())
    }

    #[instrument(skip(self, expected, new))]
    async fn compare_and_swap(
        &self,
        path: &str,
        expected: Option<Value>,
        new: Value,
    ) -> Result<bool, StoreError> {
        let mut conn = self.get_conn().await?;
        let (mode, expected_text) = match expected {
            Some(value) => ("match", serde_json::to_string(&value)?),
            None => ("absent", String::new()),
        };
        let new_text = serde_json::to_string(&new)?;

        let swapped: i32 = redis::Script::new(CAS_SCRIPT)
            .key(self.key(path))
            .arg(mode)
            .arg(expected_text)
            .arg(new_text)
            .invoke_async(&mut conn)
            .await?;

        if swapped == 0 {
            debug!(path, "CAS 期望值不匹配");
        }
        Ok(swapped == 1)
    }

    #[instrument(skip(self))]
    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let mut conn = self.get_conn().await?;
        let _: () = conn.del(self.key(path)).await?;
        Ok(())
    }

    #[instrument(skip(self, expected))]
    async fn compare_and_delete(&self, path: &str, expected: Value) -> Result<bool, StoreError> {
        let mut conn = self.get_conn().await?;
        let expected_text = serde_json::to_string(&expected)?;

        let deleted: i32 = redis::Script::new(CAD_SCRIPT)
            .key(self.key(path))
            .arg(expected_text)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    /// SCAN MATCH 遍历前缀下的键，再用 MGET 批量读取
    #[instrument(skip(self))]
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let mut conn = self.get_conn().await?;
        let pattern = format!("{}/*", self.key(prefix));

        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(
                batch
                    .into_iter()
                    .filter(|key| is_direct_child(prefix, self.path_of(key))),
            );
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN 可能重复返回同一个键
        keys.sort();
        keys.dedup();
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<Option<String>> = conn.mget(&keys).await?;

        let mut children = Vec::with_capacity(keys.len());
        for (key, raw) in keys.iter().zip(values) {
            // 在 SCAN 与 MGET 之间被删除的键直接跳过
            if let Some(text) = raw {
                children.push((self.path_of(key).to_string(), serde_json::from_str(&text)?));
            }
        }
        Ok(children)
    }
}
