use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, instrument, warn};

use rewards_shared::observability::metrics;

use crate::error::{Result, RewardsError};
use crate::models::{
    SessionStatus, StaffLock, SupportSession, TranscriptEntry, TranscriptSender,
};
use crate::store::{Store, StorePath, Versioned, paths};
use crate::transport::{ChatTransport, SendOptions};

use super::StaffRegistry;

/// 管理员强制结束会话时记录的操作者
const ADMIN_ACTOR: &str = "admin";

/// 接单时持有的客服锁
struct LockHold {
    lock: Versioned<StaffLock>,
    /// 本次调用写入了这把锁（而不是复用重复接单留下的锁）
    created: bool,
}

/// 一次转发的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayedMessage {
    pub user_id: String,
    pub staff_id: String,
    /// 实际接收方
    pub recipient: String,
    pub sender: TranscriptSender,
}

/// 客服会话路由
///
/// 会话文档以用户为键，客服占用锁以客服为键，两者都只通过 CAS 修改。
/// 进程内只缓存 客服 -> 用户 的映射，可由 [`SupportRouter::rebuild_cache`] 从存储重建。
#[derive(Clone)]
pub struct SupportRouter {
    store: Store,
    transport: Arc<dyn ChatTransport>,
    staff: StaffRegistry,
    max_attempts: u32,
    partners: Arc<DashMap<String, String>>,
}

impl SupportRouter {
    pub fn new(
        store: Store,
        transport: Arc<dyn ChatTransport>,
        staff: StaffRegistry,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            transport,
            staff,
            max_attempts,
            partners: Arc::new(DashMap::new()),
        }
    }

    pub fn staff(&self) -> &StaffRegistry {
        &self.staff
    }

    /// 用户发起客服请求
    #[instrument(skip(self))]
    pub async fn request_support(&self, user_id: &str) -> Result<SupportSession> {
        self.request_support_at(user_id, Utc::now()).await
    }

    pub(crate) async fn request_support_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SupportSession> {
        let session = self
            .store
            .update_with(
                &StorePath::support_session(user_id),
                self.max_attempts,
                |current: Option<SupportSession>| {
                    let previous = match current {
                        Some(s) if s.status == SessionStatus::Pending => {
                            return Err(RewardsError::AlreadyPending);
                        }
                        Some(s) if s.status == SessionStatus::Active => {
                            return Err(RewardsError::AlreadyActive);
                        }
                        Some(s) => Some(s.request_id),
                        None => None,
                    };
                    let request_id = next_request_id(previous, now);
                    Ok(SupportSession::pending(user_id, request_id, now))
                },
            )
            .await?;

        metrics::record_support_event("requested");
        info!(user_id, request_id = session.request_id, "客服请求已创建");

        let text = format!(
            "🆘 用户 {} 请求人工客服\n接单：/accept {} {}",
            user_id, user_id, session.request_id
        );
        for target in self.staff.notify_targets().await? {
            self.notify(&target, &text).await;
        }
        Ok(session)
    }

    /// 客服接单
    ///
    /// 先占用客服锁（同一请求可重入），再把会话从 Pending CAS 为 Active。
    /// 请求令牌不匹配或会话已不是 Pending 时返回 RequestStale；本次写入的锁
    /// 只有在会话没有由该客服接入时才归还。
    #[instrument(skip(self))]
    pub async fn accept(
        &self,
        staff_id: &str,
        user_id: &str,
        request_id: i64,
    ) -> Result<SupportSession> {
        if !self.staff.is_staff(staff_id).await? {
            return Err(RewardsError::NotAuthorized(format!(
                "{} 不是客服",
                staff_id
            )));
        }

        let hold = self.acquire_lock(staff_id, user_id, request_id).await?;

        let now = Utc::now();
        let result = self
            .store
            .update_with(
                &StorePath::support_session(user_id),
                self.max_attempts,
                |current: Option<SupportSession>| {
                    let mut session = current.ok_or(RewardsError::RequestStale)?;
                    if session.status != SessionStatus::Pending || session.request_id != request_id
                    {
                        return Err(RewardsError::RequestStale);
                    }
                    session.status = SessionStatus::Active;
                    session.staff_id = Some(staff_id.to_string());
                    session.accepted_at = Some(now);
                    session.transcript.clear();
                    Ok(session)
                },
            )
            .await;

        let session = match result {
            Ok(session) => session,
            Err(e) => {
                if hold.created {
                    self.abandon_lock(staff_id, user_id, &hold.lock).await;
                }
                if matches!(e, RewardsError::RequestStale) {
                    metrics::record_support_event("stale");
                    debug!(staff_id, user_id, request_id, "客服请求已失效");
                }
                return Err(e);
            }
        };

        self.partners
            .insert(staff_id.to_string(), user_id.to_string());
        metrics::record_support_event("accepted");
        info!(staff_id, user_id, request_id, "客服已接单");

        self.notify(user_id, "👨‍💼 客服已接入，请直接发送消息").await;
        Ok(session)
    }

    /// 转发一条会话消息并写入会话记录
    #[instrument(skip(self, text))]
    pub async fn relay_message(&self, from: &str, text: &str) -> Result<RelayedMessage> {
        let (user_id, sender) = match self.partner_of(from).await? {
            Some(user_id) => (user_id, TranscriptSender::Staff),
            None => (from.to_string(), TranscriptSender::User),
        };

        let entry = TranscriptEntry {
            sender,
            sender_id: from.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        };
        let session = self
            .store
            .update_with(
                &StorePath::support_session(&user_id),
                self.max_attempts,
                |current: Option<SupportSession>| {
                    let mut session = current.ok_or(RewardsError::NoActiveSession)?;
                    let participant = match sender {
                        TranscriptSender::User => true,
                        TranscriptSender::Staff => session.staff_id.as_deref() == Some(from),
                    };
                    if session.status != SessionStatus::Active || !participant {
                        return Err(RewardsError::NoActiveSession);
                    }
                    session.transcript.push(entry.clone());
                    Ok(session)
                },
            )
            .await?;

        let staff_id = session
            .staff_id
            .clone()
            .ok_or(RewardsError::NoActiveSession)?;
        let (recipient, forwarded) = match sender {
            TranscriptSender::Staff => (user_id.clone(), format!("👨‍💼 客服：{}", text)),
            TranscriptSender::User => (staff_id.clone(), format!("💬 用户 {}：{}", user_id, text)),
        };
        self.transport
            .send_message(&recipient, &forwarded, &SendOptions::default())
            .await?;

        Ok(RelayedMessage {
            user_id,
            staff_id,
            recipient,
            sender,
        })
    }

    /// 结束会话，只有客服可以结束
    #[instrument(skip(self))]
    pub async fn end(&self, actor: &str) -> Result<SupportSession> {
        let Some(user_id) = self.partner_of(actor).await? else {
            let session = self.session(actor).await?;
            if session.is_some_and(|s| s.status.is_open()) {
                return Err(RewardsError::NotAuthorized(
                    "只有客服可以结束会话".to_string(),
                ));
            }
            return Err(RewardsError::NoActiveSession);
        };

        let now = Utc::now();
        let result = self
            .store
            .update_with(
                &StorePath::support_session(&user_id),
                self.max_attempts,
                |current: Option<SupportSession>| {
                    let mut session = current.ok_or(RewardsError::NoActiveSession)?;
                    if session.status != SessionStatus::Active
                        || session.staff_id.as_deref() != Some(actor)
                    {
                        return Err(RewardsError::NoActiveSession);
                    }
                    session.status = SessionStatus::Completed;
                    session.ended_at = Some(now);
                    session.ended_by = Some(actor.to_string());
                    Ok(session)
                },
            )
            .await;

        // 会话已不属于该客服时，锁是残留的，同样释放
        self.release_lock(actor, &user_id).await;
        let session = result?;

        metrics::record_support_event("ended");
        info!(staff_id = actor, user_id = %user_id, "客服会话已结束");
        self.notify(&user_id, "✅ 客服会话已结束，感谢你的耐心").await;
        self.notify(actor, &format!("✅ 与用户 {} 的会话已结束", user_id))
            .await;
        Ok(session)
    }

    /// 管理员强制结束 Pending 或 Active 会话
    #[instrument(skip(self))]
    pub async fn force_end(&self, user_id: &str) -> Result<SupportSession> {
        let now = Utc::now();
        let session = self
            .store
            .update_with(
                &StorePath::support_session(user_id),
                self.max_attempts,
                |current: Option<SupportSession>| {
                    let mut session = current.ok_or(RewardsError::NoActiveSession)?;
                    if !session.status.is_open() {
                        return Err(RewardsError::NoActiveSession);
                    }
                    session.status = SessionStatus::Completed;
                    session.ended_at = Some(now);
                    session.ended_by = Some(ADMIN_ACTOR.to_string());
                    Ok(session)
                },
            )
            .await?;

        if let Some(staff_id) = &session.staff_id {
            self.release_lock(staff_id, user_id).await;
            self.notify(staff_id, &format!("⚠️ 与用户 {} 的会话已被管理员结束", user_id))
                .await;
        }

        metrics::record_support_event("force_ended");
        info!(user_id, "客服会话已被强制结束");
        self.notify(user_id, "✅ 客服会话已结束").await;
        Ok(session)
    }

    pub async fn session(&self, user_id: &str) -> Result<Option<SupportSession>> {
        Ok(self
            .store
            .get::<SupportSession>(&StorePath::support_session(user_id))
            .await?
            .map(Versioned::into_inner))
    }

    /// 进行中的会话，按接入时间排序
    pub async fn active_sessions(&self) -> Result<Vec<SupportSession>> {
        let mut sessions: Vec<SupportSession> = self
            .sessions()
            .await?
            .into_iter()
            .filter(|s| s.status == SessionStatus::Active)
            .collect();
        sessions.sort_by(|a, b| a.accepted_at.cmp(&b.accepted_at));
        Ok(sessions)
    }

    /// 用户或客服是否处于进行中的会话
    pub async fn is_in_session(&self, user_id: &str) -> Result<bool> {
        if self.partner_of(user_id).await?.is_some() {
            return Ok(true);
        }
        Ok(self
            .session(user_id)
            .await?
            .is_some_and(|s| s.status == SessionStatus::Active))
    }

    /// 保留最近结束的 `keep` 个会话记录，清空更早会话的消息记录
    ///
    /// 只清空 transcript，不删除会话文档，请求令牌因此保持单调。返回清理的会话数。
    #[instrument(skip(self))]
    pub async fn cleanup_completed(&self, keep: usize) -> Result<usize> {
        let mut completed: Vec<SupportSession> = self
            .sessions()
            .await?
            .into_iter()
            .filter(|s| s.status == SessionStatus::Completed && !s.transcript.is_empty())
            .collect();
        completed.sort_by(|a, b| b.ended_at.cmp(&a.ended_at));

        let mut cleaned = 0;
        for stale in completed.into_iter().skip(keep) {
            let ended_at = stale.ended_at;
            self.store
                .update_with(
                    &StorePath::support_session(&stale.user_id),
                    self.max_attempts,
                    |current: Option<SupportSession>| {
                        let mut session = current.ok_or(RewardsError::NoActiveSession)?;
                        if session.status == SessionStatus::Completed
                            && session.ended_at == ended_at
                        {
                            session.transcript.clear();
                        }
                        Ok(session)
                    },
                )
                .await?;
            cleaned += 1;
        }

        if cleaned > 0 {
            info!(cleaned, keep, "已清理历史会话记录");
        }
        Ok(cleaned)
    }

    /// 从 `staffSessions/*` 重建 客服 -> 用户 缓存
    pub async fn rebuild_cache(&self) -> Result<usize> {
        let locks = self.store.list::<StaffLock>(paths::STAFF_SESSIONS).await?;
        self.partners.clear();
        for lock in locks {
            let lock = lock.into_inner();
            self.partners.insert(lock.staff_id, lock.user_id);
        }
        info!(entries = self.partners.len(), "客服会话缓存已重建");
        Ok(self.partners.len())
    }

    /// 缓存中的会话对象，可能过期，不作为判断依据
    pub fn cached_partner(&self, staff_id: &str) -> Option<String> {
        self.partners.get(staff_id).map(|v| v.value().clone())
    }

    async fn sessions(&self) -> Result<Vec<SupportSession>> {
        Ok(self
            .store
            .list::<SupportSession>(paths::SUPPORT_SESSIONS)
            .await?
            .into_iter()
            .map(Versioned::into_inner)
            .collect())
    }

    /// 客服当前占用的用户，以存储中的锁为准并同步缓存
    async fn partner_of(&self, staff_id: &str) -> Result<Option<String>> {
        let lock = self
            .store
            .get::<StaffLock>(&StorePath::staff_session(staff_id))
            .await?
            .map(Versioned::into_inner);
        match &lock {
            Some(lock) => {
                self.partners
                    .insert(staff_id.to_string(), lock.user_id.clone());
            }
            None => {
                self.partners.remove(staff_id);
            }
        }
        Ok(lock.map(|l| l.user_id))
    }

    /// 占用客服锁
    ///
    /// 锁已指向同一请求时复用（重复点击接单）；指向同一用户的旧请求时替换为本次请求；
    /// 指向其他用户时返回 AlreadyActive。
    async fn acquire_lock(
        &self,
        staff_id: &str,
        user_id: &str,
        request_id: i64,
    ) -> Result<LockHold> {
        let path = StorePath::staff_session(staff_id);
        for _ in 0..self.max_attempts.max(1) {
            let current = self.store.get::<StaffLock>(&path).await?;
            match &current {
                Some(held) if held.value.user_id != user_id => {
                    return Err(RewardsError::AlreadyActive);
                }
                Some(held) if held.value.request_id == request_id => {
                    return Ok(LockHold {
                        lock: held.clone(),
                        created: false,
                    });
                }
                _ => {}
            }

            let lock = StaffLock {
                staff_id: staff_id.to_string(),
                user_id: user_id.to_string(),
                request_id,
                locked_at: Utc::now(),
            };
            if self
                .store
                .compare_and_swap(&path, current.as_ref(), &lock)
                .await?
            {
                return Ok(LockHold {
                    lock: Versioned::written(lock)?,
                    created: true,
                });
            }
        }
        Err(RewardsError::Contention { path })
    }

    /// 接单失败后归还本次写入的锁
    ///
    /// 重复接单时另一次调用复用了同一把锁，它把会话置为 Active 后锁仍在使用，不能删除。
    async fn abandon_lock(&self, staff_id: &str, user_id: &str, lock: &Versioned<StaffLock>) {
        let result = async {
            let serving = self.session(user_id).await?.is_some_and(|s| {
                s.status == SessionStatus::Active && s.staff_id.as_deref() == Some(staff_id)
            });
            if serving {
                return Ok(false);
            }
            self.store
                .delete_if_unchanged(&StorePath::staff_session(staff_id), lock)
                .await
        }
        .await;

        match result {
            Ok(true) => {
                self.partners
                    .remove_if(staff_id, |_, partner| partner == user_id);
            }
            Ok(false) => debug!(staff_id, user_id, "客服锁仍在使用，保留"),
            Err(e) => warn!(staff_id, user_id, error = %e, "归还客服锁失败"),
        }
    }

    /// 释放客服锁，仅当锁仍指向该用户
    ///
    /// 删除以读取到的锁文档为条件，期间锁被改写（例如客服已接入下一位用户）时保留。
    async fn release_lock(&self, staff_id: &str, user_id: &str) {
        let path = StorePath::staff_session(staff_id);
        let result = async {
            match self.store.get::<StaffLock>(&path).await? {
                Some(lock) if lock.value.user_id == user_id => {
                    self.store.delete_if_unchanged(&path, &lock).await
                }
                _ => Ok(false),
            }
        }
        .await;

        match result {
            Ok(released) => {
                if !released {
                    debug!(staff_id, user_id, "客服锁已不指向该用户，跳过");
                }
                self.partners
                    .remove_if(staff_id, |_, partner| partner == user_id);
            }
            Err(e) => warn!(staff_id, user_id, error = %e, "释放客服锁失败"),
        }
    }

    async fn notify(&self, target: &str, text: &str) {
        if let Err(e) = self
            .transport
            .send_message(target, text, &SendOptions::default())
            .await
        {
            debug!(target, error = %e, "客服通知发送失败");
        }
    }
}

/// 下一个请求令牌：当前毫秒时间戳，且严格大于上一个令牌
fn next_request_id(previous: Option<i64>, now: DateTime<Utc>) -> i64 {
    let now_ms = now.timestamp_millis();
    match previous {
        Some(prev) if prev >= now_ms => prev + 1,
        _ => now_ms,
    }
}
