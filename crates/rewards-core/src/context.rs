//! 服务装配
//!
//! 所有领域服务共享同一个 [`Store`] 与消息通道，由 [`CoreServices::build`]
//! 一次性构造。进程启动后调用 [`CoreServices::startup`] 重建内存缓存并恢复广播。

use std::sync::Arc;

use tracing::{info, warn};

use rewards_shared::config::AppConfig;

use crate::broadcast::BroadcastCoordinator;
use crate::dispatch::{
    AcceptSupportHandler, BalanceHandler, ClaimKeyHandler, CommandRegistry, DailyRewardHandler,
    Dispatcher, EndSupportHandler, MyKeysHandler, RequestSupportHandler, StartHandler,
    SupportMessageHandler, VerifyMembershipHandler,
};
use crate::error::Result;
use crate::inventory::{InventoryAllocator, ProductCatalog};
use crate::ledger::{DailyRewardService, LedgerEngine};
use crate::referral::ReferralEngine;
use crate::settings::SettingsService;
use crate::stats::StatsService;
use crate::store::Store;
use crate::support::{StaffRegistry, SupportRouter};
use crate::transport::ChatTransport;
use crate::users::UserService;
use crate::worker::ExpiryReminderWorker;

/// 启动恢复结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartupReport {
    pub sessions_cached: usize,
    pub broadcasts_resumed: usize,
}

/// 进程内共享的服务集合
#[derive(Clone)]
pub struct CoreServices {
    pub store: Store,
    pub transport: Arc<dyn ChatTransport>,
    pub settings: SettingsService,
    pub users: UserService,
    pub ledger: LedgerEngine,
    pub daily: DailyRewardService,
    pub catalog: ProductCatalog,
    pub allocator: InventoryAllocator,
    pub referral: ReferralEngine,
    pub broadcast: BroadcastCoordinator,
    pub support: SupportRouter,
    pub stats: StatsService,
    pub dispatcher: Dispatcher,
}

impl CoreServices {
    pub fn build(store: Store, transport: Arc<dyn ChatTransport>, config: &AppConfig) -> Self {
        let max_attempts = config.ledger.max_cas_attempts.max(1);

        let settings = SettingsService::new(store.clone());
        let users = UserService::new(store.clone(), max_attempts);
        let ledger = LedgerEngine::new(store.clone(), max_attempts);
        let daily = DailyRewardService::new(ledger.clone(), settings.clone());
        let catalog = ProductCatalog::new(store.clone(), settings.clone(), max_attempts);
        let allocator = InventoryAllocator::new(store.clone(), ledger.clone(), settings.clone());
        let referral = ReferralEngine::new(
            store.clone(),
            ledger.clone(),
            settings.clone(),
            transport.clone(),
            max_attempts,
        );
        let broadcast = BroadcastCoordinator::new(
            store.clone(),
            transport.clone(),
            config.broadcast.clone(),
            max_attempts,
        );
        let staff = StaffRegistry::new(store.clone(), config.support.admin_ids.clone(), max_attempts);
        let support = SupportRouter::new(store.clone(), transport.clone(), staff, max_attempts);
        let stats = StatsService::new(store.clone());

        let mut registry = CommandRegistry::new();
        registry
            .register(Arc::new(StartHandler {
                users: users.clone(),
                referral: referral.clone(),
            }))
            .register(Arc::new(VerifyMembershipHandler {
                referral: referral.clone(),
            }))
            .register(Arc::new(ClaimKeyHandler {
                allocator: allocator.clone(),
            }))
            .register(Arc::new(DailyRewardHandler {
                daily: daily.clone(),
            }))
            .register(Arc::new(BalanceHandler {
                ledger: ledger.clone(),
            }))
            .register(Arc::new(MyKeysHandler {
                catalog: catalog.clone(),
            }))
            .register(Arc::new(RequestSupportHandler {
                router: support.clone(),
            }))
            .register(Arc::new(AcceptSupportHandler {
                router: support.clone(),
            }))
            .register(Arc::new(SupportMessageHandler {
                router: support.clone(),
            }))
            .register(Arc::new(EndSupportHandler {
                router: support.clone(),
            }));
        let dispatcher = Dispatcher::new(registry, settings.clone(), users.clone(), support.clone());

        Self {
            store,
            transport,
            settings,
            users,
            ledger,
            daily,
            catalog,
            allocator,
            referral,
            broadcast,
            support,
            stats,
            dispatcher,
        }
    }

    /// 从持久化状态重建客服配对缓存，并恢复未完成的广播
    pub async fn startup(&self) -> Result<StartupReport> {
        let sessions_cached = self.support.rebuild_cache().await?;
        let broadcasts_resumed = match self.broadcast.resume_incomplete().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "恢复广播任务失败");
                0
            }
        };
        info!(sessions_cached, broadcasts_resumed, "启动恢复完成");
        Ok(StartupReport {
            sessions_cached,
            broadcasts_resumed,
        })
    }

    pub fn expiry_worker(&self, config: &AppConfig) -> ExpiryReminderWorker {
        ExpiryReminderWorker::new(self.store.clone(), self.transport.clone(), &config.worker)
    }
}
