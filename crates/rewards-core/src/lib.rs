//! 积分奖励核心库
//!
//! 聊天机器人积分体系的领域逻辑，所有状态保存在带 CAS 的键值存储中，
//! 多个进程可以同时读写同一份数据。
//!
//! ## 核心功能
//!
//! - **积分账本**：带 CAS 重试的加减分，余额在提交时校验
//! - **卡密分配**：按入库时间从旧到新抢占卡密，扣分失败时补偿回滚
//! - **邀请奖励**：新用户加入后给邀请人发放一次奖励，VIP 加成
//! - **广播**：分群快照、可取消、进度持久化、进程重启后恢复
//! - **人工客服**：请求排队、客服加锁接入、消息中转
//! - **命令分发**：入站命令按类型路由到处理器
//!
//! ## 模块结构
//!
//! - `store`: 键值存储适配层（内存 / Redis）
//! - `models`: 领域模型
//! - `ledger`: 积分账本与每日签到
//! - `inventory`: 产品目录与卡密分配
//! - `referral`: 邀请奖励
//! - `broadcast`: 广播任务
//! - `support`: 客服会话
//! - `stats`: 运营统计
//! - `dispatch`: 命令注册与分发
//! - `transport`: 消息通道
//! - `worker`: 后台任务
//! - `context`: 服务装配

pub mod broadcast;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod inventory;
pub mod ledger;
pub mod models;
pub mod referral;
pub mod settings;
pub mod stats;
pub mod store;
pub mod support;
pub mod transport;
pub mod users;
pub mod worker;

pub use broadcast::{BroadcastCoordinator, select_targets};
pub use context::{CoreServices, StartupReport};
pub use dispatch::{Command, CommandHandler, CommandKind, CommandOutcome, CommandRegistry, Dispatcher};
pub use error::{Result, RewardsError};
pub use inventory::{ClaimResult, InventoryAllocator, ProductCatalog};
pub use ledger::{DailyRewardService, LedgerEngine, LedgerReason};
pub use models::*;
pub use referral::{ReferralEngine, ReferralOutcome};
pub use settings::SettingsService;
pub use stats::StatsService;
pub use store::{Store, StorePath, Versioned};
pub use support::{StaffRegistry, SupportRouter};
pub use transport::{ChatTransport, SendOptions, TransportError};
pub use users::UserService;
pub use worker::ExpiryReminderWorker;
