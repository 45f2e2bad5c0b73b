//! 存储路径
//!
//! 每类实体一个顶层前缀，路径不是兼容性约定，只在此处集中定义。

pub const USERS: &str = "users";
pub const BANS: &str = "bans";
pub const PRODUCTS: &str = "products";
pub const INVENTORY: &str = "inventory";
pub const BROADCAST_JOBS: &str = "broadcastJobs";
pub const BROADCAST_TARGETS: &str = "broadcastTargets";
pub const SUPPORT_SESSIONS: &str = "supportSessions";
pub const STAFF_SESSIONS: &str = "staffSessions";
pub const STAFF: &str = "staff";
pub const SETTINGS: &str = "settings";

/// 存储路径构造器
pub struct StorePath;

impl StorePath {
    pub fn user(user_id: &str) -> String {
        format!("{}/{}", USERS, user_id)
    }

    pub fn ban(user_id: &str) -> String {
        format!("{}/{}", BANS, user_id)
    }

    pub fn product(product_id: &str) -> String {
        format!("{}/{}", PRODUCTS, product_id)
    }

    pub fn item(item_id: &str) -> String {
        format!("{}/{}", INVENTORY, item_id)
    }

    pub fn broadcast_job(job_id: &str) -> String {
        format!("{}/{}", BROADCAST_JOBS, job_id)
    }

    pub fn broadcast_targets(job_id: &str) -> String {
        format!("{}/{}", BROADCAST_TARGETS, job_id)
    }

    pub fn support_session(user_id: &str) -> String {
        format!("{}/{}", SUPPORT_SESSIONS, user_id)
    }

    pub fn staff_session(staff_id: &str) -> String {
        format!("{}/{}", STAFF_SESSIONS, staff_id)
    }

    pub fn staff(staff_id: &str) -> String {
        format!("{}/{}", STAFF, staff_id)
    }

    pub fn settings() -> String {
        SETTINGS.to_string()
    }

    /// 路径的实体类型（第一段），用于日志和指标标签
    pub fn entity(path: &str) -> &str {
        path.split('/').next().unwrap_or(path)
    }
}

/// `path` 是否为 `prefix` 的直接子节点
pub(crate) fn is_direct_child(prefix: &str, path: &str) -> bool {
    path.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|child| !child.is_empty() && !child.contains('/'))
}
