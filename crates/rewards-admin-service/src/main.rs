//! 积分奖励管理后台服务
//!
//! 装配核心服务，恢复未完成的广播，启动到期提醒 Worker 与 REST API。

use axum::{
    Router,
    extract::Request,
    http::{HeaderValue, header::HeaderName},
    middleware::{self, Next},
    response::Response,
};
use rewards_admin_service::{routes, state::AppState};
use rewards_core::{CoreServices, store::Store, transport};
use rewards_shared::{
    config::AppConfig,
    observability::{self, ObservabilityConfig},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

const SERVICE_NAME: &str = "rewards-admin-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = AppConfig::load(SERVICE_NAME).unwrap_or_default();
    if config.service_name.is_empty() {
        config.service_name = SERVICE_NAME.to_string();
    }

    let _guard = observability::init(&ObservabilityConfig::from_app_config(&config)).await?;

    info!(
        addr = %config.server_addr(),
        environment = %config.environment,
        store = ?config.store.backend,
        "Starting rewards-admin-service"
    );

    let store = Store::from_config(&config.store, &config.redis)?;
    let transport = transport::from_config(&config.transport)?;
    info!(store = store.backend_name(), transport = transport.name(), "Infrastructure ready");

    let core = CoreServices::build(store, transport, &config);
    let report = core.startup().await?;
    info!(
        sessions_cached = report.sessions_cached,
        broadcasts_resumed = report.broadcasts_resumed,
        "State recovered"
    );

    // 后台 Worker 与 HTTP 服务共用关闭令牌
    let shutdown = CancellationToken::new();
    let worker = core.expiry_worker(&config);
    let worker_token = shutdown.clone();
    let worker_handle = tokio::spawn(async move { worker.run(worker_token).await });

    let state = AppState::new(core, config.support.transcript_keep);
    let app: Router = routes::build_router(state)
        .layer(middleware::from_fn(security_headers))
        .layer(cors_layer(&config));

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(e) = worker_handle.await {
        warn!(error = %e, "ExpiryReminderWorker 异常退出");
    }
    info!("Server shutdown complete");

    Ok(())
}

/// CORS 配置：通过 REWARDS_CORS_ORIGINS 控制允许的来源
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let allowed_origins = std::env::var("REWARDS_CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3001,http://localhost:5173".to_string());

    if allowed_origins == "*" {
        if config.is_production() {
            warn!("REWARDS_CORS_ORIGINS=\"*\" 在生产环境中不安全，请设置为具体域名");
        }
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    info!("CORS allowed_origins: {}", allowed_origins);
    let origins: Vec<_> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// 为所有响应注入 HTTP 安全头
async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    response
}

/// 监听关闭信号
///
/// 收到 SIGTERM 或 Ctrl+C 后返回，触发 axum 的优雅关闭流程。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
