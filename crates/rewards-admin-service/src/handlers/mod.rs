//! HTTP 请求处理器

pub mod broadcast;
pub mod events;
pub mod health;
pub mod products;
pub mod settings;
pub mod stats;
pub mod support;
pub mod users;
