//! 积分奖励管理后台服务
//!
//! 提供广播、产品库存、用户积分与客服会话的管理 REST API，
//! 以及供消息通道适配器提交入站命令的 `/events` 端点。
//!
//! ## 模块结构
//!
//! - `dto`: 请求和响应的数据传输对象
//! - `error`: 错误类型定义
//! - `handlers`: HTTP 请求处理器
//! - `routes`: 路由配置
//! - `state`: 应用状态
//!
//! ## 技术栈
//!
//! - Web 框架：Axum
//! - 数据验证：validator
//! - 序列化：serde (camelCase)

pub mod dto;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use dto::{ApiResponse, BroadcastCreated, BroadcastJobDto, StartBroadcastRequest};
pub use error::{AdminError, Result};
pub use state::AppState;
