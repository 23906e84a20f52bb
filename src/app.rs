use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info};

use jobd_api::SubmissionService;
use jobd_core::traits::{
    ChunkStore, ExpiryStore, JobQueue, RateStore, UploadSessionRepository, UsageRepository,
};
use jobd_core::models::PlanTier;
use jobd_core::AppConfig;
use jobd_dispatcher::{PeriodicScheduler, RetryConfig, RetryPolicy};
use jobd_domain::{QuotaLedger, RateLimiter, UploadReassembler};
use jobd_infrastructure::{
    ExtensionHeuristicScanner, InMemoryExpiryStore, InMemoryFileStore, InMemoryJobQueue,
    InMemoryMailStore, InMemoryRateStore, InMemoryUploadSessionRepository,
    InMemoryUsageRepository, LocalChunkStore, LoggingEmailTransport, MetricsCollector,
    PostgresUploadSessionRepository, PostgresUsageRepository, RedisRateStore,
};
use jobd_worker::handlers::{
    CleanupExpiredHandler, ReassembleUploadHandler, ResetMonthlyUsageHandler, ScanFileHandler,
    SendEmailHandler,
};
use jobd_worker::{HandlerRegistry, WorkerPool};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行Worker池
    Worker,
    /// 仅运行周期调度器
    Scheduler,
    /// 运行所有组件
    All,
}

/// 主应用程序
///
/// 所有组件在进程启动时各构造一次，以 `Arc` 句柄显式注入消费方，
/// 没有模块级单例。
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    queue: Arc<dyn JobQueue>,
    pool: WorkerPool,
    scheduler: Arc<PeriodicScheduler>,
    submission: Arc<SubmissionService>,
    mail_store: Arc<InMemoryMailStore>,
    file_store: Arc<InMemoryFileStore>,
}

impl Application {
    /// 创建应用实例并完成组件装配
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!(mode = ?mode, "初始化应用程序");

        let metrics = Arc::new(MetricsCollector::new());
        let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new());

        // 速率计数存储：多进程部署用redis共享，嵌入式用内存
        let rate_store: Arc<dyn RateStore> = match config.rate_limiter.backend.as_str() {
            "redis" => Arc::new(
                RedisRateStore::connect(
                    &config.rate_limiter.redis_url,
                    config.rate_limiter.window_seconds * 2,
                )
                .await
                .context("连接Redis失败")?,
            ),
            _ => Arc::new(InMemoryRateStore::new()),
        };

        // 账本与会话存储：数据库启用时走Postgres，否则内存
        let (usage_repo, session_repo): (
            Arc<dyn UsageRepository>,
            Arc<dyn UploadSessionRepository>,
        ) = if config.database.enabled {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .connect(&config.database.url)
                .await
                .context("连接数据库失败")?;
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("执行数据库迁移失败")?;
            (
                Arc::new(PostgresUsageRepository::new(pool.clone())),
                Arc::new(PostgresUploadSessionRepository::new(pool)),
            )
        } else {
            (
                Arc::new(InMemoryUsageRepository::new()),
                Arc::new(InMemoryUploadSessionRepository::new()),
            )
        };

        let chunk_store: Arc<dyn ChunkStore> = Arc::new(LocalChunkStore::new(
            config.upload.chunk_dir.clone(),
            config.upload.final_dir.clone(),
        ));

        // 外部协作方的嵌入式实现
        let plans = Arc::new(jobd_infrastructure::StaticPlanProvider::new(PlanTier::Free));
        let mail_store = Arc::new(InMemoryMailStore::new());
        let transport = Arc::new(LoggingEmailTransport::new());
        let file_store = Arc::new(InMemoryFileStore::new());
        let scanner = Arc::new(ExtensionHeuristicScanner::new());
        let token_store: Arc<dyn ExpiryStore> = Arc::new(InMemoryExpiryStore::new());
        let share_store: Arc<dyn ExpiryStore> = Arc::new(InMemoryExpiryStore::new());

        let ledger = Arc::new(QuotaLedger::new(usage_repo));
        let limiter = Arc::new(RateLimiter::new(rate_store));
        let reassembler = Arc::new(UploadReassembler::new(
            session_repo,
            chunk_store,
            file_store.clone(),
            queue.clone(),
            ledger.clone(),
        ));

        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(SendEmailHandler::new(
            mail_store.clone(),
            transport,
            ledger.clone(),
        )));
        registry.register(Arc::new(ScanFileHandler::new(file_store.clone(), scanner)));
        registry.register(Arc::new(ReassembleUploadHandler::new(reassembler.clone())));
        registry.register(Arc::new(ResetMonthlyUsageHandler::new(ledger.clone())));
        registry.register(Arc::new(CleanupExpiredHandler::new(
            reassembler.clone(),
            config.upload.session_ttl_hours,
            token_store,
            share_store,
        )));

        let pool = WorkerPool::builder(queue.clone(), registry)
            .metrics(metrics)
            .retry_policy(RetryPolicy::new(RetryConfig::from(&config.retry)))
            .worker_count(config.worker.worker_count)
            .poll_interval_ms(config.worker.poll_interval_ms)
            .visibility_timeout_seconds(config.queue.visibility_timeout_seconds)
            .soft_timeout_seconds(config.worker.soft_timeout_seconds)
            .hard_timeout_seconds(config.worker.hard_timeout_seconds)
            .build();

        let scheduler = Arc::new(
            PeriodicScheduler::new(queue.clone(), config.scheduler.tick_interval_seconds)
                .with_standard_entries()
                .await
                .context("注册周期任务表失败")?,
        );

        let submission = Arc::new(SubmissionService::new(
            queue.clone(),
            limiter,
            ledger,
            plans,
            reassembler,
            config.rate_limiter.window_seconds,
        ));

        Ok(Self {
            config,
            mode,
            queue,
            pool,
            scheduler,
            submission,
            mail_store,
            file_store,
        })
    }

    /// 提交服务句柄（供外部REST层嵌入消费）
    pub fn submission(&self) -> Arc<SubmissionService> {
        Arc::clone(&self.submission)
    }

    /// 任务队列句柄
    pub fn queue(&self) -> Arc<dyn JobQueue> {
        Arc::clone(&self.queue)
    }

    /// 嵌入式邮件记录存储句柄
    pub fn mail_store(&self) -> Arc<InMemoryMailStore> {
        Arc::clone(&self.mail_store)
    }

    /// 嵌入式文件记录存储句柄
    pub fn file_store(&self) -> Arc<InMemoryFileStore> {
        Arc::clone(&self.file_store)
    }

    /// 运行应用，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let run_worker =
            matches!(self.mode, AppMode::Worker | AppMode::All) && self.config.worker.enabled;
        let run_scheduler =
            matches!(self.mode, AppMode::Scheduler | AppMode::All) && self.config.scheduler.enabled;

        // 内部扇出关闭信号给各组件
        let (fanout_tx, _) = broadcast::channel(4);

        if run_worker {
            self.pool.start().await;
        }

        let scheduler_handle = if run_scheduler {
            let scheduler = Arc::clone(&self.scheduler);
            let rx = fanout_tx.subscribe();
            Some(tokio::spawn(async move {
                scheduler.run(rx).await;
            }))
        } else {
            None
        };

        info!(
            worker = run_worker,
            scheduler = run_scheduler,
            "应用已启动"
        );

        let _ = shutdown_rx.recv().await;
        info!("开始停止各组件");
        let _ = fanout_tx.send(());

        if let Some(handle) = scheduler_handle {
            if let Err(e) = handle.await {
                error!(error = %e, "周期调度器退出异常");
            }
        }
        if run_worker {
            self.pool.stop().await;
        }
        info!("应用已停止");
        Ok(())
    }
}
