use serde::Serialize;

/// 用户统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total: u64,
    /// 既未屏蔽机器人也未被封禁
    pub active: u64,
    pub blocked: u64,
    pub banned: u64,
    /// 最近 24 小时内建档
    pub new_today: u64,
    /// 最近 7 天内建档
    pub new_this_week: u64,
}

/// 卡密统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStats {
    pub total: u64,
    pub claimed: u64,
    pub unclaimed: u64,
    /// 已领取且已过期，包含在 claimed 中
    pub expired: u64,
    /// 最近 24 小时内领取
    pub claimed_today: u64,
}

/// 运营总览
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub users: UserStats,
    pub keys: KeyStats,
    pub products: u64,
}

/// 分页结果，页码从 1 开始
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    /// 从已排序的完整列表中截取一页
    pub fn slice(all: Vec<T>, page: u32, page_size: u32) -> Self {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let total = all.len() as u64;
        let skip = (page as usize - 1).saturating_mul(page_size as usize);
        let items = all.into_iter().skip(skip).take(page_size as usize).collect();
        Self {
            items,
            total,
            page,
            page_size,
        }
    }

    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.page_size.max(1)))
    }
}
