//! 广播协调器
//!
//! 任务生命周期：Pending -> Sending -> {Completed | Cancelled | Failed}。
//!
//! ## 设计说明
//!
//! - 目标用户在启动时快照一次，存放在 `broadcastTargets/{jobId}`，重启后据此续发
//! - 每个运行中的任务在本进程登记一个 [`CancellationToken`]，登记表只是缓存，
//!   取消请求同时写入任务文档，由 Worker 在刷新进度时读取
//! - 单个接收方失败只计入计数，不影响任务

mod worker;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use rewards_shared::config::BroadcastConfig;

use crate::error::{Result, RewardsError};
use crate::models::{BroadcastJob, BroadcastTargets, JobStatus, Segment, User};
use crate::store::{Store, StorePath, paths};
use crate::transport::ChatTransport;

use worker::{BroadcastWorker, finish};

/// 广播协调器
#[derive(Clone)]
pub struct BroadcastCoordinator {
    store: Store,
    transport: Arc<dyn ChatTransport>,
    config: BroadcastConfig,
    max_attempts: u32,
    running: Arc<DashMap<String, CancellationToken>>,
}

impl BroadcastCoordinator {
    pub fn new(
        store: Store,
        transport: Arc<dyn ChatTransport>,
        config: BroadcastConfig,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            transport,
            config,
            max_attempts,
            running: Arc::new(DashMap::new()),
        }
    }

    /// 创建并启动广播任务，返回进入 Sending 状态的任务
    #[instrument(skip(self, message), fields(message_len = message.len()))]
    pub async fn start(&self, segment: Segment, message: &str) -> Result<BroadcastJob> {
        if message.trim().is_empty() {
            return Err(RewardsError::Validation("广播内容不能为空".to_string()));
        }

        let job = BroadcastJob::new(Uuid::now_v7().to_string(), segment, message);
        let job_path = StorePath::broadcast_job(&job.id);
        if !self.store.create(&job_path, &job).await? {
            return Err(RewardsError::Internal(format!("广播任务 ID 冲突: {}", job.id)));
        }

        let targets = match self.snapshot(&job.id, segment, Utc::now()).await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "目标快照失败");
                if let Err(finish_err) = finish(
                    &self.store,
                    self.max_attempts,
                    &job.id,
                    JobStatus::Failed,
                    None,
                    Some(format!("目标快照失败: {}", e)),
                )
                .await
                {
                    warn!(job_id = %job.id, error = %finish_err, "快照失败后未能标记任务失败");
                }
                return Err(e);
            }
        };

        let total = targets.len() as u64;
        let job_id = job.id.clone();
        let job = self
            .store
            .update_with(&job_path, self.max_attempts, |current: Option<BroadcastJob>| {
                let mut job = current.ok_or_else(|| RewardsError::JobNotFound(job_id.clone()))?;
                job.total = total;
                job.status = JobStatus::Sending;
                job.started_at = Some(Utc::now());
                Ok(job)
            })
            .await?;

        info!(job_id = %job.id, segment = %segment, total, "广播任务已启动");
        self.spawn(job.clone(), targets);
        Ok(job)
    }

    /// 请求取消
    ///
    /// 本进程内运行的任务立即触发令牌；无论如何都在任务上记录取消请求。
    /// 已处于终态的任务原样返回。
    #[instrument(skip(self))]
    pub async fn cancel(&self, job_id: &str) -> Result<BroadcastJob> {
        let path = StorePath::broadcast_job(job_id);
        let job = self
            .store
            .update_with(&path, self.max_attempts, |current: Option<BroadcastJob>| {
                let mut job =
                    current.ok_or_else(|| RewardsError::JobNotFound(job_id.to_string()))?;
                if !job.status.is_terminal() {
                    job.cancel_requested = true;
                }
                Ok(job)
            })
            .await?;

        if job.status.is_terminal() {
            return Ok(job);
        }

        if let Some(token) = self.running.get(job_id) {
            token.cancel();
            info!(job_id, "已触发广播取消令牌");
        } else {
            info!(job_id, "任务不在本进程运行，已记录取消请求");
        }
        Ok(job)
    }

    pub async fn get(&self, job_id: &str) -> Result<BroadcastJob> {
        self.store
            .get::<BroadcastJob>(&StorePath::broadcast_job(job_id))
            .await?
            .map(|v| v.into_inner())
            .ok_or_else(|| RewardsError::JobNotFound(job_id.to_string()))
    }

    /// 所有任务，最新的在前
    pub async fn list(&self) -> Result<Vec<BroadcastJob>> {
        let mut jobs: Vec<BroadcastJob> = self
            .store
            .list::<BroadcastJob>(paths::BROADCAST_JOBS)
            .await?
            .into_iter()
            .map(|v| v.into_inner())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(jobs)
    }

    /// 本进程中运行的任务数
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// 启动时恢复未结束的任务
    ///
    /// - 已请求取消的任务直接置为 Cancelled
    /// - 有快照的 Pending / Sending 任务从 `sent` 处续发
    /// - 没有快照的任务置为 Failed
    ///
    /// 返回恢复运行的任务数
    #[instrument(skip(self))]
    pub async fn resume_incomplete(&self) -> Result<usize> {
        let mut resumed = 0;
        for job in self.list().await? {
            if job.status.is_terminal() || self.running.contains_key(&job.id) {
                continue;
            }

            if job.cancel_requested {
                finish(
                    &self.store,
                    self.max_attempts,
                    &job.id,
                    JobStatus::Cancelled,
                    None,
                    None,
                )
                .await?;
                info!(job_id = %job.id, "恢复时发现取消请求，任务已取消");
                continue;
            }

            let targets = self
                .store
                .get::<BroadcastTargets>(&StorePath::broadcast_targets(&job.id))
                .await?;
            let Some(targets) = targets else {
                finish(
                    &self.store,
                    self.max_attempts,
                    &job.id,
                    JobStatus::Failed,
                    None,
                    Some("重启后缺少目标快照".to_string()),
                )
                .await?;
                warn!(job_id = %job.id, "任务缺少目标快照，已置为 Failed");
                continue;
            };

            let user_ids = targets.into_inner().user_ids;
            let total = user_ids.len() as u64;
            let job_id = job.id;
            let job = self
                .store
                .update_with(
                    &StorePath::broadcast_job(&job_id),
                    self.max_attempts,
                    |current: Option<BroadcastJob>| {
                        let mut job = current
                            .ok_or_else(|| RewardsError::JobNotFound(job_id.clone()))?;
                        job.total = total;
                        job.status = JobStatus::Sending;
                        job.started_at.get_or_insert_with(Utc::now);
                        Ok(job)
                    },
                )
                .await?;

            info!(job_id = %job.id, sent = job.sent, total, "广播任务已恢复");
            self.spawn(job, user_ids);
            resumed += 1;
        }
        Ok(resumed)
    }

    /// 计算并保存目标快照
    async fn snapshot(
        &self,
        job_id: &str,
        segment: Segment,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let users: Vec<User> = self
            .store
            .list::<User>(paths::USERS)
            .await?
            .into_iter()
            .map(|v| v.into_inner())
            .collect();
        let user_ids = select_targets(users, segment, now, self.config.active_window_days);

        self.store
            .put(
                &StorePath::broadcast_targets(job_id),
                &BroadcastTargets {
                    job_id: job_id.to_string(),
                    user_ids: user_ids.clone(),
                },
            )
            .await?;
        Ok(user_ids)
    }

    fn spawn(&self, job: BroadcastJob, targets: Vec<String>) {
        let token = CancellationToken::new();
        self.running.insert(job.id.clone(), token.clone());

        let worker = BroadcastWorker {
            store: self.store.clone(),
            transport: self.transport.clone(),
            config: self.config.clone(),
            max_attempts: self.max_attempts,
            token,
        };
        let running = self.running.clone();
        let job_id = job.id.clone();

        tokio::spawn(async move {
            if let Err(e) = worker.run(job, targets).await {
                error!(job_id = %job_id, error = %e, "广播 Worker 异常退出");
            }
            running.remove(&job_id);
        });
    }
}

/// 按分群筛选目标用户
///
/// 拉黑或封禁的用户不在任何分群中。结果按加入时间排序。
pub fn select_targets(
    users: Vec<User>,
    segment: Segment,
    now: DateTime<Utc>,
    active_window_days: i64,
) -> Vec<String> {
    let active_since = now - Duration::days(active_window_days);
    let mut selected: Vec<User> = users
        .into_iter()
        .filter(|u| !u.is_blocked && !u.is_banned)
        .filter(|u| match segment {
            Segment::All => true,
            Segment::Active => u.last_active >= active_since,
            Segment::Vip => u.is_vip(),
        })
        .collect();
    selected.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.id.cmp(&b.id)));
    selected.into_iter().map(|u| u.id).collect()
}
