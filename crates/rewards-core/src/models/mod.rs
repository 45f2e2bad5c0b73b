//! 数据模型
//!
//! 所有实体均以 JSON 文档形式保存在键值存储中，字段使用 camelCase。

mod broadcast;
mod inventory;
mod product;
mod settings;
mod stats;
mod support;
mod user;

pub use broadcast::{BroadcastJob, BroadcastTargets, JobStatus, Segment};
pub use inventory::{InventoryItem, ItemStatus};
pub use product::{Product, StockSummary};
pub use settings::Settings;
pub use stats::{KeyStats, Page, Stats, UserStats};
pub use support::{
    SessionStatus, StaffLock, SupportSession, SupportStaff, TranscriptEntry, TranscriptSender,
};
pub use user::{User, UserBan, UserProfile, VipTier};
