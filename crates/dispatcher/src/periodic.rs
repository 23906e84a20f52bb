use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tokio::time::interval;
use tracing::{error, info, warn};

use jobd_core::models::{CleanupScope, Job, ResetUsagePayload};
use jobd_core::traits::JobQueue;
use jobd_core::JobdResult;

use crate::cron_utils::CronSchedule;

type JobBuilder = Box<dyn Fn() -> JobdResult<Job> + Send + Sync>;

/// 周期任务表条目
///
/// 周期任务不是队列状态：条目记录各自的上次入队时间，由调度循环
/// 判断"自上次执行以来是否已到期"并重新提交。
pub struct PeriodicEntry {
    name: String,
    schedule: CronSchedule,
    build_job: JobBuilder,
    last_run: Option<DateTime<Utc>>,
}

impl PeriodicEntry {
    pub fn new(
        name: impl Into<String>,
        cron_expr: &str,
        build_job: impl Fn() -> JobdResult<Job> + Send + Sync + 'static,
    ) -> JobdResult<Self> {
        Ok(Self {
            name: name.into(),
            schedule: CronSchedule::new(cron_expr)?,
            build_job: Box::new(build_job),
            last_run: None,
        })
    }
}

/// 周期任务调度器
///
/// 以固定间隔检查周期任务表，把到期的条目作为普通任务重新提交。
/// 错过的时间点（进程重启、检查间隔偏移）会在下一次检查时补提交
/// 一次，不会堆积多次。
pub struct PeriodicScheduler {
    queue: Arc<dyn JobQueue>,
    entries: Mutex<Vec<PeriodicEntry>>,
    tick_interval: Duration,
}

impl PeriodicScheduler {
    pub fn new(queue: Arc<dyn JobQueue>, tick_interval_seconds: u64) -> Self {
        Self {
            queue,
            entries: Mutex::new(Vec::new()),
            tick_interval: Duration::from_secs(tick_interval_seconds),
        }
    }

    /// 注册标准周期任务表：月度用量重置、每小时过期会话清理、
    /// 每日过期令牌与分享链接清理
    pub async fn with_standard_entries(self) -> JobdResult<Self> {
        self.register(PeriodicEntry::new("reset-monthly-usage", "0 0 0 1 * *", || {
            Job::reset_monthly_usage(&ResetUsagePayload { period_key: None })
        })?)
        .await;
        self.register(PeriodicEntry::new(
            "cleanup-expired-sessions",
            "0 0 * * * *",
            || Job::cleanup_expired(CleanupScope::UploadSessions),
        )?)
        .await;
        self.register(PeriodicEntry::new(
            "cleanup-expired-tokens",
            "0 0 3 * * *",
            || Job::cleanup_expired(CleanupScope::Tokens),
        )?)
        .await;
        self.register(PeriodicEntry::new(
            "cleanup-expired-shares",
            "0 15 3 * * *",
            || Job::cleanup_expired(CleanupScope::Shares),
        )?)
        .await;
        Ok(self)
    }

    pub async fn register(&self, entry: PeriodicEntry) {
        info!(name = %entry.name, "periodic entry registered");
        self.entries.lock().await.push(entry);
    }

    /// 执行一次调度检查，返回本次入队的任务数
    pub async fn tick(&self) -> JobdResult<u32> {
        self.tick_at(Utc::now()).await
    }

    /// 在指定时间点执行调度检查（供测试控制时钟）
    pub async fn tick_at(&self, now: DateTime<Utc>) -> JobdResult<u32> {
        let mut entries = self.entries.lock().await;
        let mut enqueued = 0u32;
        for entry in entries.iter_mut() {
            if !entry.schedule.should_trigger(entry.last_run, now) {
                continue;
            }
            let job = match (entry.build_job)() {
                Ok(job) => job,
                Err(e) => {
                    error!(name = %entry.name, error = %e, "failed to build periodic job");
                    continue;
                }
            };
            match self.queue.enqueue(job).await {
                Ok(job_id) => {
                    info!(name = %entry.name, job_id = %job_id, "periodic job enqueued");
                    entry.last_run = Some(now);
                    enqueued += 1;
                }
                Err(e) => {
                    // 入队失败不推进last_run，下一次检查重新尝试
                    warn!(name = %entry.name, error = %e, "failed to enqueue periodic job");
                }
            }
        }
        Ok(enqueued)
    }

    /// 调度循环，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut tick_interval = interval(self.tick_interval);
        info!(
            tick_interval_seconds = self.tick_interval.as_secs(),
            "periodic scheduler started"
        );
        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "periodic tick failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("periodic scheduler shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobd_core::models::JobKind;
    use jobd_infrastructure::InMemoryJobQueue;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    async fn scheduler_with_hourly_cleanup() -> (PeriodicScheduler, Arc<InMemoryJobQueue>) {
        let queue = Arc::new(InMemoryJobQueue::new());
        let scheduler = PeriodicScheduler::new(queue.clone(), 60);
        scheduler
            .register(
                PeriodicEntry::new("cleanup-expired-sessions", "0 0 * * * *", || {
                    Job::cleanup_expired(CleanupScope::UploadSessions)
                })
                .unwrap(),
            )
            .await;
        (scheduler, queue)
    }

    #[tokio::test]
    async fn test_due_entry_enqueued_once_per_period() {
        let (scheduler, queue) = scheduler_with_hourly_cleanup().await;

        // 整点触发
        assert_eq!(scheduler.tick_at(at("2024-01-15T10:00:10Z")).await.unwrap(), 1);
        // 同一周期内的后续检查不重复入队
        assert_eq!(scheduler.tick_at(at("2024-01-15T10:01:10Z")).await.unwrap(), 0);
        assert_eq!(scheduler.tick_at(at("2024-01-15T10:59:00Z")).await.unwrap(), 0);
        // 下一个整点再次触发
        assert_eq!(scheduler.tick_at(at("2024-01-15T11:00:05Z")).await.unwrap(), 1);

        assert_eq!(queue.depth().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_missed_period_fires_once_on_next_tick() {
        let (scheduler, queue) = scheduler_with_hourly_cleanup().await;

        assert_eq!(scheduler.tick_at(at("2024-01-15T10:00:10Z")).await.unwrap(), 1);
        // 跳过了三个整点，补触发一次而不是三次
        assert_eq!(scheduler.tick_at(at("2024-01-15T13:30:00Z")).await.unwrap(), 1);
        assert_eq!(queue.depth().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_standard_entries_cover_all_kinds() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let scheduler = PeriodicScheduler::new(queue.clone(), 60)
            .with_standard_entries()
            .await
            .unwrap();

        // 月初零点：月度重置、整点会话清理、3点的令牌清理尚未到期
        let enqueued = scheduler.tick_at(at("2024-02-01T00:00:30Z")).await.unwrap();
        assert_eq!(enqueued, 2);

        let mut kinds = Vec::new();
        while let Some(job) = queue
            .dequeue(std::time::Duration::from_secs(30))
            .await
            .unwrap()
        {
            kinds.push(job.kind);
        }
        assert!(kinds.contains(&JobKind::ResetMonthlyUsage));
        assert!(kinds.contains(&JobKind::CleanupExpired));
    }
}
