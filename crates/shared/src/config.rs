//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// 服务配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            workers: None,
        }
    }
}

/// Redis 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    /// 所有键的命名空间前缀，多个环境共用一个 Redis 时用于隔离
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "rewards".to_string(),
        }
    }
}

/// 存储后端类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    /// 进程内存储，仅用于本地开发和测试
    #[default]
    Memory,
    Redis,
}

/// 存储适配层配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackendKind,
    /// 瞬时故障最大重试次数（不含首次执行）
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::Memory,
            max_retries: 2,
            initial_delay_ms: 100,
            max_delay_ms: 2000,
            multiplier: 2.0,
        }
    }
}

impl StoreConfig {
    /// 转换为存储层使用的重试策略
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
        }
    }
}

/// 积分账本配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// 乐观并发（CAS）最大尝试次数，耗尽后返回 Contention
    pub max_cas_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_cas_attempts: 5,
        }
    }
}

/// 广播配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// 两次发送之间的固定间隔，用于遵守消息通道的限流
    pub send_delay_ms: u64,
    /// 每发送 N 条持久化一次进度
    pub progress_every: u64,
    /// "活跃用户" 分群的时间窗口
    pub active_window_days: i64,
    /// 失败率达到该阈值时任务终止为 Failed
    pub abort_failure_ratio: f64,
    /// 计算失败率前至少需要的发送数
    pub abort_min_sends: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            send_delay_ms: 50,
            progress_every: 10,
            active_window_days: 7,
            abort_failure_ratio: 1.0,
            abort_min_sends: 20,
        }
    }
}

/// 客服会话配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupportConfig {
    /// 管理员用户 ID，新的客服请求也会通知到这些账号
    pub admin_ids: Vec<String>,
    /// 清理时保留的已结束会话数
    pub transcript_keep: usize,
}

impl Default for SupportConfig {
    fn default() -> Self {
        Self {
            admin_ids: Vec::new(),
            transcript_keep: 10,
        }
    }
}

/// 消息通道配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// 为空时退化为仅记录日志的通道
    pub telegram_bot_token: Option<String>,
    pub api_base: String,
    pub request_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token: None,
            api_base: "https://api.telegram.org".to_string(),
            request_timeout_secs: 10,
        }
    }
}

/// 后台 Worker 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub expiry_poll_interval_secs: u64,
    /// 到期前多少小时发送提醒
    pub expiry_remind_hours: i64,
    /// 领取后多少分钟内不提醒，短时长卡密领取时就已落在提醒窗口内
    pub expiry_claim_grace_minutes: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            expiry_poll_interval_secs: 3600,
            expiry_remind_hours: 24,
            expiry_claim_grace_minutes: 60,
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_port: 9090,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub store: StoreConfig,
    pub ledger: LedgerConfig,
    pub broadcast: BroadcastConfig,
    pub support: SupportConfig,
    pub transport: TransportConfig,
    pub worker: WorkerConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（REWARDS_ 前缀，层级用双下划线，如 REWARDS_REDIS__URL -> redis.url）
    /// 5. 服务特定端口环境变量（如 REWARDS_ADMIN_PORT）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        // .env 文件不存在时忽略
        let _ = dotenvy::dotenv();

        let env = std::env::var("REWARDS_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("REWARDS")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("support.admin_ids")
                    .try_parsing(true),
            );

        let mut config: Self = builder.build()?.try_deserialize()?;

        if let Some(port) = Self::get_service_port_from_env(service_name) {
            config.server.port = port;
        }

        Ok(config)
    }

    /// 从环境变量获取服务特定端口
    ///
    /// - rewards-admin-service -> REWARDS_ADMIN_PORT
    /// - 其他服务：服务名转大写下划线 + _PORT
    fn get_service_port_from_env(service_name: &str) -> Option<u16> {
        let env_var_name = match service_name {
            "rewards-admin-service" => "REWARDS_ADMIN_PORT".to_string(),
            _ => format!("{}_PORT", service_name.to_uppercase().replace('-', "_")),
        };

        std::env::var(&env_var_name)
            .ok()
            .and_then(|v| v.parse().ok())
    }

    /// 获取服务地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.store.backend, StoreBackendKind::Memory);
        assert_eq!(config.ledger.max_cas_attempts, 5);
        assert_eq!(config.broadcast.progress_every, 10);
        assert_eq!(config.broadcast.send_delay_ms, 50);
    }

    #[test]
    fn test_shipped_default_toml_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/default.toml");
        let config: AppConfig = Config::builder()
            .add_source(File::from(path))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.redis.key_prefix, "rewards");
        assert_eq!(config.worker.expiry_claim_grace_minutes, 60);
        assert_eq!(config.worker.expiry_remind_hours, 24);
    }

    #[test]
    fn test_server_addr() {
        let config = AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
                workers: None,
            },
            ..Default::default()
        };
        assert_eq!(config.server_addr(), "127.0.0.1:3000");
    }

    #[test]
    fn test_store_retry_policy() {
        let policy = StoreConfig::default().retry_policy();
        // 首次执行 + 2 次重试 = 3 次尝试
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
    }

    #[test]
    fn test_service_port_env_var_names() {
        let test_cases = vec![
            ("rewards-admin-service", "REWARDS_ADMIN_PORT"),
            ("my-custom-service", "MY_CUSTOM_SERVICE_PORT"),
        ];

        for (service_name, expected_env_var) in test_cases {
            // SAFETY: 测试环境中单线程执行，不会有并发问题
            let test_port = 12345u16;
            unsafe {
                std::env::set_var(expected_env_var, test_port.to_string());
            }

            let result = AppConfig::get_service_port_from_env(service_name);
            assert_eq!(
                result,
                Some(test_port),
                "Service '{}' should read from '{}'",
                service_name,
                expected_env_var
            );

            unsafe {
                std::env::remove_var(expected_env_var);
            }
        }
    }
}
