//! 人工客服会话
//!
//! 用户发起请求 -> 客服凭请求令牌接单 -> 双向转发 -> 客服结束。
//! 每个参与者同一时间至多一个 Pending / Active 会话，由会话文档与客服锁上的 CAS 保证。

mod router;
mod staff;

pub use router::{RelayedMessage, SupportRouter};
pub use staff::StaffRegistry;
