//! 共享库
//!
//! 包含所有服务共用的配置加载、重试退避、日志与指标等基础设施代码。

pub mod config;
pub mod observability;
pub mod retry;
