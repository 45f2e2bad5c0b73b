//! 卡密到期提醒 Worker
//!
//! 定期扫描已领取、即将到期且尚未提醒的卡密，给持有人发送提醒。
//! 刚领取的卡密在宽限期内跳过，领取流程的扣款与补偿不会和提醒标记交错。
//! 提醒标记先通过 CAS 写入再发送，多实例部署时同一个卡密至多提醒一次。
//! 已过期的卡密不做任何修改，过期判断是惰性的。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use rewards_shared::config::WorkerConfig;
use rewards_shared::observability::metrics;

use crate::error::Result;
use crate::models::{InventoryItem, ItemStatus};
use crate::store::{Store, StorePath, Versioned, paths};
use crate::transport::{ChatTransport, SendOptions};

const WORKER_NAME: &str = "expiry_reminder";

/// 到期提醒 Worker
pub struct ExpiryReminderWorker {
    store: Store,
    transport: Arc<dyn ChatTransport>,
    poll_interval: Duration,
    remind_within: chrono::Duration,
    claim_grace: chrono::Duration,
}

impl ExpiryReminderWorker {
    pub fn new(store: Store, transport: Arc<dyn ChatTransport>, config: &WorkerConfig) -> Self {
        Self {
            store,
            transport,
            poll_interval: Duration::from_secs(config.expiry_poll_interval_secs.max(1)),
            remind_within: chrono::Duration::hours(config.expiry_remind_hours),
            claim_grace: chrono::Duration::minutes(config.expiry_claim_grace_minutes.max(0)),
        }
    }

    /// 主循环：按固定间隔处理，直到令牌被取消
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            poll_interval = ?self.poll_interval,
            remind_hours = self.remind_within.num_hours(),
            "ExpiryReminderWorker 已启动"
        );

        loop {
            match self.process_once(Utc::now()).await {
                Ok(0) => {}
                Ok(reminded) => info!(reminded, "到期提醒已发送"),
                Err(e) => error!(error = %e, "到期提醒处理出错"),
            }
            metrics::set_worker_last_run(WORKER_NAME);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!("ExpiryReminderWorker 已停止");
    }

    /// 处理一轮，返回本实例发出的提醒数
    pub async fn process_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let deadline = now + self.remind_within;
        let claimed_before = now - self.claim_grace;
        let mut due: Vec<Versioned<InventoryItem>> = self
            .store
            .list::<InventoryItem>(paths::INVENTORY)
            .await?
            .into_iter()
            .filter(|v| {
                let item = &v.value;
                item.status == ItemStatus::Claimed
                    && !item.expiry_notified
                    && !item.is_expired(now)
                    && item.expires_at.is_some_and(|at| at <= deadline)
                    && item.claimed_at.is_some_and(|at| at <= claimed_before)
            })
            .collect();
        due.sort_by(|a, b| a.value.expires_at.cmp(&b.value.expires_at));

        let mut reminded = 0;
        for current in due {
            let mut flagged = current.value.clone();
            flagged.expiry_notified = true;
            if !self
                .store
                .compare_and_swap(&StorePath::item(&flagged.id), Some(&current), &flagged)
                .await?
            {
                debug!(item_id = %flagged.id, "提醒已由其他实例处理");
                continue;
            }

            let (Some(user_id), Some(hours_left)) =
                (flagged.claimed_by.as_deref(), flagged.hours_left(now))
            else {
                continue;
            };
            let text = format!(
                "⏰ 你的卡密（{} / {} 天）将在 {} 小时后到期",
                flagged.product_id, flagged.duration_days, hours_left
            );
            match self
                .transport
                .send_message(user_id, &text, &SendOptions::default())
                .await
            {
                Ok(()) => reminded += 1,
                Err(e) => debug!(item_id = %flagged.id, user_id, error = %e, "到期提醒发送失败"),
            }
        }
        Ok(reminded)
    }
}
