//! 广播发送 Worker
//!
//! 每个任务一个 Worker，按目标快照逐个发送。取消令牌在每次发送前检查；
//! 每发送 N 条刷新一次进度，并读取任务上的 `cancel_requested`，
//! 使其他进程发起的取消也能生效。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use rewards_shared::config::BroadcastConfig;
use rewards_shared::observability::metrics;

use crate::error::{Result, RewardsError};
use crate::models::{BroadcastJob, JobStatus};
use crate::store::{Store, StorePath};
use crate::transport::{ChatTransport, SendOptions, TransportError};

/// 发送计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Counters {
    pub sent: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl Counters {
    fn from_job(job: &BroadcastJob) -> Self {
        Self {
            sent: job.sent,
            delivered: job.delivered,
            failed: job.failed,
        }
    }

    fn apply(&self, job: &mut BroadcastJob) {
        job.sent = self.sent;
        job.delivered = self.delivered;
        job.failed = self.failed;
    }
}

pub(crate) struct BroadcastWorker {
    pub store: Store,
    pub transport: Arc<dyn ChatTransport>,
    pub config: BroadcastConfig,
    pub max_attempts: u32,
    pub token: CancellationToken,
}

impl BroadcastWorker {
    /// 从任务当前的 `sent` 位置继续发送，直到进入终态
    pub async fn run(self, job: BroadcastJob, targets: Vec<String>) -> Result<BroadcastJob> {
        let job_id = job.id.clone();
        let mut counters = Counters::from_job(&job);
        let progress_every = self.config.progress_every.max(1);
        let delay = Duration::from_millis(self.config.send_delay_ms);
        let options = SendOptions::html();
        let mut abort_reason = None;

        info!(
            job_id = %job_id,
            total = targets.len(),
            resume_from = counters.sent,
            "广播 Worker 已启动"
        );

        for user_id in targets.iter().skip(counters.sent as usize) {
            if self.token.is_cancelled() {
                break;
            }

            match self
                .transport
                .send_message(user_id, &job.message, &options)
                .await
            {
                Ok(()) => {
                    counters.delivered += 1;
                    metrics::record_broadcast_send("delivered");
                }
                Err(TransportError::RecipientUnreachable(reason)) => {
                    counters.failed += 1;
                    metrics::record_broadcast_send("unreachable");
                    self.mark_blocked(user_id, &reason).await;
                }
                Err(e) => {
                    counters.failed += 1;
                    metrics::record_broadcast_send("failed");
                    warn!(job_id = %job_id, user_id = %user_id, error = %e, "广播发送失败");
                }
            }
            counters.sent += 1;

            if counters.sent % progress_every == 0 {
                self.flush(&job_id, counters).await;
            }

            if counters.sent >= self.config.abort_min_sends
                && counters.failed as f64 / counters.sent as f64 >= self.config.abort_failure_ratio
            {
                abort_reason = Some(format!(
                    "失败率过高: {}/{} 条发送失败",
                    counters.failed, counters.sent
                ));
                break;
            }

            if !delay.is_zero() {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        let status = if abort_reason.is_some() {
            JobStatus::Failed
        } else if self.token.is_cancelled() && (counters.sent as usize) < targets.len() {
            JobStatus::Cancelled
        } else {
            JobStatus::Completed
        };

        let job = finish(
            &self.store,
            self.max_attempts,
            &job_id,
            status,
            Some(counters),
            abort_reason,
        )
        .await?;
        info!(
            job_id = %job_id,
            status = job.status.as_str(),
            sent = job.sent,
            delivered = job.delivered,
            failed = job.failed,
            "广播任务结束"
        );
        Ok(job)
    }

    /// 刷新进度，发现外部取消请求时触发令牌
    async fn flush(&self, job_id: &str, counters: Counters) {
        let result = self
            .store
            .update_with(
                &StorePath::broadcast_job(job_id),
                self.max_attempts,
                |current: Option<BroadcastJob>| {
                    let mut job =
                        current.ok_or_else(|| RewardsError::JobNotFound(job_id.to_string()))?;
                    counters.apply(&mut job);
                    Ok(job)
                },
            )
            .await;

        match result {
            Ok(job) if job.cancel_requested => {
                info!(job_id, "检测到取消请求");
                self.token.cancel();
            }
            Ok(_) => {}
            Err(e) => warn!(job_id, error = %e, "广播进度刷新失败"),
        }
    }

    /// 用户屏蔽了机器人，之后的广播跳过该用户
    async fn mark_blocked(&self, user_id: &str, reason: &str) {
        let mut fields = Map::new();
        fields.insert("isBlocked".to_string(), Value::Bool(true));
        fields.insert("blockedAt".to_string(), json!(Utc::now()));
        match self.store.patch(&StorePath::user(user_id), fields).await {
            Ok(()) => info!(user_id, reason, "用户已屏蔽机器人，标记为 blocked"),
            Err(e) => warn!(user_id, error = %e, "标记 blocked 失败"),
        }
    }
}

/// 把任务写入终态
///
/// 任务已处于终态时保持原样返回
pub(crate) async fn finish(
    store: &Store,
    max_attempts: u32,
    job_id: &str,
    status: JobStatus,
    counters: Option<Counters>,
    error_message: Option<String>,
) -> Result<BroadcastJob> {
    let mut transitioned = false;
    let result = store
        .update_with(
            &StorePath::broadcast_job(job_id),
            max_attempts,
            |current: Option<BroadcastJob>| {
                let mut job =
                    current.ok_or_else(|| RewardsError::JobNotFound(job_id.to_string()))?;
                transitioned = !job.status.is_terminal();
                if !transitioned {
                    return Ok(job);
                }
                if let Some(counters) = counters {
                    counters.apply(&mut job);
                }
                job.status = status;
                job.completed_at = Some(Utc::now());
                job.error = error_message.clone();
                Ok(job)
            },
        )
        .await;

    match result {
        Ok(job) => {
            if transitioned {
                metrics::record_broadcast_job(&job.segment.to_string(), job.status.as_str());
            }
            Ok(job)
        }
        Err(e) => {
            error!(job_id, status = status.as_str(), error = %e, "广播任务终态写入失败");
            Err(e)
        }
    }
}
