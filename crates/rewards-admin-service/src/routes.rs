//! 路由配置模块
//!
//! 定义所有 REST API 端点的路由映射

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use rewards_shared::observability::middleware as obs_middleware;

use crate::{handlers, state::AppState};

/// 广播任务路由
pub fn broadcast_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/broadcast",
            post(handlers::broadcast::start_broadcast).get(handlers::broadcast::list_broadcasts),
        )
        .route("/broadcast/{job_id}", get(handlers::broadcast::get_broadcast))
        .route(
            "/broadcast/{job_id}/cancel",
            post(handlers::broadcast::cancel_broadcast),
        )
}

/// 入站命令路由
pub fn event_routes() -> Router<AppState> {
    Router::new().route("/events", post(handlers::events::submit_event))
}

/// 产品与库存路由
pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/products",
            post(handlers::products::create_product).get(handlers::products::list_products),
        )
        .route("/products/{id}", delete(handlers::products::delete_product))
        .route("/products/{id}/stock", get(handlers::products::get_stock))
        .route(
            "/products/{id}/items",
            post(handlers::products::add_items).get(handlers::products::list_items),
        )
}

/// 用户管理路由
pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(handlers::users::list_users))
        .route("/users/{id}", get(handlers::users::get_user))
        .route("/users/{id}/points", post(handlers::users::adjust_points))
        .route("/users/{id}/ban", post(handlers::users::set_ban))
}

/// 客服会话路由
pub fn support_routes() -> Router<AppState> {
    Router::new()
        .route("/support/sessions", get(handlers::support::active_sessions))
        .route("/support/cleanup", post(handlers::support::cleanup))
        .route("/support/{user_id}/end", post(handlers::support::force_end))
}

/// 运营设置路由
pub fn settings_routes() -> Router<AppState> {
    Router::new().route(
        "/settings",
        get(handlers::settings::get_settings).put(handlers::settings::update_settings),
    )
}

/// 运营统计路由
pub fn stats_routes() -> Router<AppState> {
    Router::new().route("/stats", get(handlers::stats::get_overview))
}

/// 所有业务路由
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(broadcast_routes())
        .merge(event_routes())
        .merge(product_routes())
        .merge(user_routes())
        .merge(support_routes())
        .merge(settings_routes())
        .merge(stats_routes())
}

/// 完整应用：业务路由 + 探针 + 可观测性中间件
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api_routes())
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}
