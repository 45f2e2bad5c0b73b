//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let builder = PrometheusBuilder::new();
    let handle = builder.install_recorder()?;

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册通用指标
///
/// 这些描述会出现在 /metrics 端点的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!("retries_total", "Total number of transient-failure retries");
    metrics::describe_counter!("cas_conflicts_total", "Total number of CAS mismatches");

    metrics::describe_counter!("ledger_ops_total", "Total number of ledger credits and debits");
    metrics::describe_counter!("ledger_points_total", "Points moved through the ledger");

    metrics::describe_counter!("key_claims_total", "Total number of key claim attempts");
    metrics::describe_histogram!("key_claim_duration_seconds", "Key claim duration in seconds");

    metrics::describe_counter!("broadcast_sends_total", "Total number of broadcast sends");
    metrics::describe_counter!("broadcast_jobs_total", "Total number of finished broadcast jobs");

    metrics::describe_counter!("support_events_total", "Total number of support session events");

    metrics::describe_gauge!(
        "worker_last_run_timestamp",
        "Unix timestamp of the last worker iteration"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录一次瞬时故障重试
#[inline]
pub fn record_retry(operation: &str) {
    metrics::counter!("retries_total", "operation" => operation.to_string()).increment(1);
}

/// 记录一次 CAS 冲突（期望值不匹配后重读）
#[inline]
pub fn record_cas_conflict(entity: &str) {
    metrics::counter!("cas_conflicts_total", "entity" => entity.to_string()).increment(1);
}

/// 记录积分变动
#[inline]
pub fn record_ledger_op(direction: &str, reason: &str, status: &str, amount: u64) {
    metrics::counter!(
        "ledger_ops_total",
        "direction" => direction.to_string(),
        "reason" => reason.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if status == "success" {
        metrics::counter!(
            "ledger_points_total",
            "direction" => direction.to_string(),
            "reason" => reason.to_string()
        )
        .increment(amount);
    }
}

/// 记录卡密领取
#[inline]
pub fn record_claim(product_id: &str, status: &str, duration_secs: f64) {
    metrics::counter!(
        "key_claims_total",
        "product_id" => product_id.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "key_claim_duration_seconds",
        "product_id" => product_id.to_string()
    )
    .record(duration_secs);
}

/// 记录广播单条发送结果（delivered / failed / unreachable）
#[inline]
pub fn record_broadcast_send(outcome: &str) {
    metrics::counter!("broadcast_sends_total", "outcome" => outcome.to_string()).increment(1);
}

/// 记录广播任务终态
#[inline]
pub fn record_broadcast_job(segment: &str, status: &str) {
    metrics::counter!(
        "broadcast_jobs_total",
        "segment" => segment.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录客服会话事件（requested / accepted / ended / stale ...）
#[inline]
pub fn record_support_event(event: &str) {
    metrics::counter!("support_events_total", "event" => event.to_string()).increment(1);
}

/// 记录 Worker 最近一次运行时间
#[inline]
pub fn set_worker_last_run(worker: &str) {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    metrics::gauge!("worker_last_run_timestamp", "worker" => worker.to_string()).set(now);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_http_request("GET", "/broadcast/1", 200, 0.1);
        record_retry("store.get");
        record_cas_conflict("users");
        record_ledger_op("credit", "referral", "success", 3);
        record_claim("pro-a", "success", 0.02);
        record_broadcast_send("delivered");
        record_broadcast_job("all", "completed");
        record_support_event("accepted");
        set_worker_last_run("expiry_reminder");
    }
}
