use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use jobd_core::models::Job;
use jobd_core::traits::{CancelToken, ExecutionOutcome, JobHandler, JobQueue, NackDisposition};
use jobd_dispatcher::RetryPolicy;
use jobd_infrastructure::MetricsCollector;

use crate::registry::HandlerRegistry;

/// Worker池构建器
pub struct WorkerPoolBuilder {
    queue: Arc<dyn JobQueue>,
    registry: HandlerRegistry,
    metrics: Arc<MetricsCollector>,
    retry_policy: RetryPolicy,
    worker_id: String,
    worker_count: usize,
    poll_interval_ms: u64,
    visibility_timeout_seconds: u64,
    soft_timeout_seconds: u64,
    hard_timeout_seconds: u64,
}

impl WorkerPoolBuilder {
    pub fn new(queue: Arc<dyn JobQueue>, registry: HandlerRegistry) -> Self {
        let hostname = hostname::get()
            .unwrap_or_else(|_| "unknown".into())
            .to_string_lossy()
            .to_string();
        Self {
            queue,
            registry,
            metrics: Arc::new(MetricsCollector::new()),
            retry_policy: RetryPolicy::default(),
            worker_id: hostname,
            worker_count: 4,
            poll_interval_ms: 500,
            visibility_timeout_seconds: 300,
            soft_timeout_seconds: 1500,
            hard_timeout_seconds: 1800,
        }
    }

    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn visibility_timeout_seconds(mut self, seconds: u64) -> Self {
        self.visibility_timeout_seconds = seconds;
        self
    }

    pub fn soft_timeout_seconds(mut self, seconds: u64) -> Self {
        self.soft_timeout_seconds = seconds;
        self
    }

    pub fn hard_timeout_seconds(mut self, seconds: u64) -> Self {
        self.hard_timeout_seconds = seconds;
        self
    }

    pub fn build(self) -> WorkerPool {
        let (shutdown_tx, _) = broadcast::channel(16);
        WorkerPool {
            inner: Arc::new(PoolInner {
                queue: self.queue,
                registry: self.registry,
                metrics: self.metrics,
                retry_policy: self.retry_policy,
                worker_id: self.worker_id,
                poll_interval: Duration::from_millis(self.poll_interval_ms),
                visibility_timeout: Duration::from_secs(self.visibility_timeout_seconds),
                soft_timeout: Duration::from_secs(self.soft_timeout_seconds),
                hard_timeout: Duration::from_secs(self.hard_timeout_seconds),
            }),
            worker_count: self.worker_count,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }
}

struct PoolInner {
    queue: Arc<dyn JobQueue>,
    registry: HandlerRegistry,
    metrics: Arc<MetricsCollector>,
    retry_policy: RetryPolicy,
    worker_id: String,
    poll_interval: Duration,
    visibility_timeout: Duration,
    soft_timeout: Duration,
    hard_timeout: Duration,
}

/// Worker池
///
/// 固定数量的Worker并发轮询共享队列，除队列与各存储自身的同步外，
/// Worker之间没有共享可变状态。执行带双重时限：软超时发出协作取消
/// 信号等待处理器在检查点退出；硬超时放弃执行并nack重投。
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    worker_count: usize,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn builder(queue: Arc<dyn JobQueue>, registry: HandlerRegistry) -> WorkerPoolBuilder {
        WorkerPoolBuilder::new(queue, registry)
    }

    /// 启动全部Worker
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        for index in 0..self.worker_count {
            let inner = Arc::clone(&self.inner);
            let shutdown_rx = self.shutdown_tx.subscribe();
            let tag = format!("{}-{index}", inner.worker_id);
            handles.push(tokio::spawn(async move {
                worker_loop(inner, shutdown_rx, tag).await;
            }));
        }
        info!(worker_count = self.worker_count, "worker pool started");
    }

    /// 停止全部Worker，等待在执行中的任务完成
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(());
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task join failed");
            }
        }
        info!("worker pool stopped");
    }
}

async fn worker_loop(
    inner: Arc<PoolInner>,
    mut shutdown_rx: broadcast::Receiver<()>,
    tag: String,
) {
    debug!(worker = %tag, "worker loop started");
    loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(broadcast::error::TryRecvError::Closed) => break,
            Err(_) => {}
        }

        match inner.queue.dequeue(inner.visibility_timeout).await {
            Ok(Some(job)) => {
                process_job(&inner, &tag, job).await;
                if let Ok(depth) = inner.queue.depth().await {
                    inner.metrics.update_queue_depth(depth);
                }
            }
            Ok(None) => {
                // 空队列时让出，等待轮询间隔或关闭信号
                tokio::select! {
                    _ = sleep(inner.poll_interval) => {}
                    _ = shutdown_rx.recv() => break,
                }
            }
            Err(e) => {
                error!(worker = %tag, error = %e, "dequeue failed");
                sleep(inner.poll_interval).await;
            }
        }
    }
    debug!(worker = %tag, "worker loop stopped");
}

async fn process_job(inner: &Arc<PoolInner>, tag: &str, job: Job) {
    let kind = job.kind;
    let Some(handler) = inner.registry.get(kind) else {
        error!(worker = %tag, job_id = %job.id, kind = %kind, "no handler registered");
        if let Err(e) = inner.queue.fail(&job.id, "未注册的任务类型").await {
            error!(job_id = %job.id, error = %e, "failed to mark job failed");
        }
        inner.metrics.record_job_failure(kind.as_str());
        return;
    };

    debug!(
        worker = %tag,
        job_id = %job.id,
        kind = %kind,
        attempt = job.attempt,
        "job execution started"
    );
    let started = Instant::now();
    let cancel = CancelToken::new();

    let execution = handler.execute(&job, &cancel);
    tokio::pin!(execution);

    // 软超时先协作取消，硬超时放弃执行
    let result = tokio::select! {
        result = &mut execution => Some(result),
        _ = sleep(inner.soft_timeout) => {
            warn!(worker = %tag, job_id = %job.id, kind = %kind, "soft time limit reached, cancelling");
            cancel.cancel();
            let grace = inner.hard_timeout.saturating_sub(inner.soft_timeout);
            match timeout(grace, &mut execution).await {
                Ok(result) => Some(result),
                Err(_) => None,
            }
        }
    };

    let duration = started.elapsed();
    match result {
        Some(Ok(ExecutionOutcome::Success)) => {
            if let Err(e) = inner.queue.ack(&job.id).await {
                error!(job_id = %job.id, error = %e, "ack failed");
                return;
            }
            inner
                .metrics
                .record_job_success(kind.as_str(), duration.as_secs_f64());
            info!(
                worker = %tag,
                job_id = %job.id,
                kind = %kind,
                duration_ms = duration.as_millis() as u64,
                "job succeeded"
            );
        }
        Some(Ok(ExecutionOutcome::Permanent { reason })) => {
            warn!(worker = %tag, job_id = %job.id, kind = %kind, reason = %reason, "job failed permanently");
            if let Err(e) = inner.queue.fail(&job.id, &reason).await {
                error!(job_id = %job.id, error = %e, "fail transition failed");
                return;
            }
            run_terminal_failure_hook(&*handler, &job).await;
            inner.metrics.record_job_failure(kind.as_str());
        }
        Some(Ok(ExecutionOutcome::Transient { reason })) => {
            warn!(worker = %tag, job_id = %job.id, kind = %kind, reason = %reason, "job failed transiently");
            retry_or_exhaust(inner, &*handler, &job).await;
        }
        Some(Err(e)) => {
            // 处理器返回错误按瞬时失败处理
            warn!(worker = %tag, job_id = %job.id, kind = %kind, error = %e, "handler returned error");
            retry_or_exhaust(inner, &*handler, &job).await;
        }
        None => {
            warn!(worker = %tag, job_id = %job.id, kind = %kind, "hard time limit reached, requeueing");
            retry_or_exhaust(inner, &*handler, &job).await;
        }
    }
}

async fn retry_or_exhaust(inner: &Arc<PoolInner>, handler: &dyn JobHandler, job: &Job) {
    let retry_after = inner.retry_policy.next_delay(job.attempt);
    match inner.queue.nack(&job.id, retry_after).await {
        Ok(NackDisposition::Retried { next_run_at }) => {
            inner.metrics.record_job_retry(job.kind.as_str());
            info!(
                job_id = %job.id,
                kind = %job.kind,
                attempt = job.attempt + 1,
                next_run_at = %next_run_at,
                "job scheduled for retry"
            );
        }
        Ok(NackDisposition::Exhausted) => {
            run_terminal_failure_hook(handler, job).await;
            inner.metrics.record_job_failure(job.kind.as_str());
        }
        Err(e) => {
            error!(job_id = %job.id, error = %e, "nack failed");
        }
    }
}

/// 终态失败副作用，只在任务进入终态 Failed 时执行一次
async fn run_terminal_failure_hook(handler: &dyn JobHandler, job: &Job) {
    if let Err(e) = handler.on_terminal_failure(job).await {
        error!(
            job_id = %job.id,
            kind = %job.kind,
            error = %e,
            "terminal failure side effect failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use jobd_core::models::{JobKind, JobState};
    use jobd_core::JobdResult;
    use jobd_dispatcher::RetryConfig;
    use jobd_infrastructure::InMemoryJobQueue;

    struct ScriptedHandler {
        kind: JobKind,
        executions: AtomicU32,
        terminal_failures: AtomicU32,
        outcome: Box<dyn Fn(u32, &CancelToken) -> ExecutionOutcome + Send + Sync>,
    }

    impl ScriptedHandler {
        fn new(
            kind: JobKind,
            outcome: impl Fn(u32, &CancelToken) -> ExecutionOutcome + Send + Sync + 'static,
        ) -> Self {
            Self {
                kind,
                executions: AtomicU32::new(0),
                terminal_failures: AtomicU32::new(0),
                outcome: Box::new(outcome),
            }
        }
    }

    #[async_trait]
    impl JobHandler for ScriptedHandler {
        fn kind(&self) -> JobKind {
            self.kind
        }

        async fn execute(
            &self,
            _job: &Job,
            cancel: &CancelToken,
        ) -> JobdResult<ExecutionOutcome> {
            let n = self.executions.fetch_add(1, Ordering::SeqCst);
            Ok((self.outcome)(n, cancel))
        }

        async fn on_terminal_failure(&self, _job: &Job) -> JobdResult<()> {
            self.terminal_failures.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fast_retry_policy() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            base_interval_seconds: 1,
            max_interval_seconds: 1,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        })
    }

    fn pool_with(
        queue: Arc<InMemoryJobQueue>,
        handler: Arc<ScriptedHandler>,
    ) -> WorkerPool {
        let mut registry = HandlerRegistry::new();
        registry.register(handler);
        WorkerPool::builder(queue, registry)
            .worker_count(1)
            .poll_interval_ms(20)
            .retry_policy(fast_retry_policy())
            .soft_timeout_seconds(1)
            .hard_timeout_seconds(2)
            .build()
    }

    #[tokio::test]
    async fn test_successful_job_is_acked() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let handler = Arc::new(ScriptedHandler::new(JobKind::SendEmail, |_, _| {
            ExecutionOutcome::Success
        }));
        let pool = pool_with(queue.clone(), handler.clone());

        let job_id = queue
            .enqueue(Job::new(JobKind::SendEmail, serde_json::json!({})))
            .await
            .unwrap();

        pool.start().await;
        sleep(Duration::from_millis(300)).await;
        pool.stop().await;

        let job = queue.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(handler.executions.load(Ordering::SeqCst), 1);
        assert_eq!(handler.terminal_failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_always_transient_runs_exactly_max_attempts() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let handler = Arc::new(ScriptedHandler::new(JobKind::ScanFile, |_, _| {
            ExecutionOutcome::transient("网络抖动")
        }));
        let pool = pool_with(queue.clone(), handler.clone());

        let job_id = queue
            .enqueue(Job::new(JobKind::ScanFile, serde_json::json!({})).with_max_attempts(3))
            .await
            .unwrap();

        pool.start().await;
        sleep(Duration::from_secs(4)).await;
        pool.stop().await;

        let job = queue.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempt, 3);
        assert_eq!(handler.executions.load(Ordering::SeqCst), 3);
        // 失败副作用只执行一次
        assert_eq!(handler.terminal_failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_retries() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let handler = Arc::new(ScriptedHandler::new(JobKind::SendEmail, |_, _| {
            ExecutionOutcome::permanent("用户不存在")
        }));
        let pool = pool_with(queue.clone(), handler.clone());

        let job_id = queue
            .enqueue(Job::new(JobKind::SendEmail, serde_json::json!({})))
            .await
            .unwrap();

        pool.start().await;
        sleep(Duration::from_millis(300)).await;
        pool.stop().await;

        let job = queue.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.last_error.as_deref(), Some("用户不存在"));
        assert_eq!(handler.executions.load(Ordering::SeqCst), 1);
        assert_eq!(handler.terminal_failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_then_success_recovers() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let handler = Arc::new(ScriptedHandler::new(JobKind::SendEmail, |n, _| {
            if n == 0 {
                ExecutionOutcome::transient("暂时不可用")
            } else {
                ExecutionOutcome::Success
            }
        }));
        let pool = pool_with(queue.clone(), handler.clone());

        let job_id = queue
            .enqueue(Job::new(JobKind::SendEmail, serde_json::json!({})))
            .await
            .unwrap();

        pool.start().await;
        sleep(Duration::from_secs(3)).await;
        pool.stop().await;

        let job = queue.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.attempt, 1);
        assert_eq!(handler.executions.load(Ordering::SeqCst), 2);
    }

    struct StubbornHandler {
        respects_cancel: bool,
    }

    #[async_trait]
    impl JobHandler for StubbornHandler {
        fn kind(&self) -> JobKind {
            JobKind::CleanupExpired
        }

        async fn execute(
            &self,
            _job: &Job,
            cancel: &CancelToken,
        ) -> JobdResult<ExecutionOutcome> {
            loop {
                if self.respects_cancel && cancel.is_cancelled() {
                    return Ok(ExecutionOutcome::transient("收到取消信号"));
                }
                sleep(Duration::from_millis(25)).await;
            }
        }
    }

    #[tokio::test]
    async fn test_soft_timeout_triggers_cooperative_cancel() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(StubbornHandler {
            respects_cancel: true,
        }));
        let pool = WorkerPool::builder(queue.clone(), registry)
            .worker_count(1)
            .poll_interval_ms(20)
            .retry_policy(fast_retry_policy())
            .soft_timeout_seconds(1)
            .hard_timeout_seconds(10)
            .build();

        let job_id = queue
            .enqueue(Job::new(JobKind::CleanupExpired, serde_json::json!({})))
            .await
            .unwrap();

        pool.start().await;
        sleep(Duration::from_millis(1600)).await;
        pool.stop().await;

        // 软超时后处理器在检查点返回瞬时失败，任务按退避重试
        let job = queue.get_job(&job_id).await.unwrap().unwrap();
        assert!(job.attempt >= 1);
        assert_ne!(job.state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn test_hard_timeout_requeues_job() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(StubbornHandler {
            respects_cancel: false,
        }));
        let pool = WorkerPool::builder(queue.clone(), registry)
            .worker_count(1)
            .poll_interval_ms(20)
            .retry_policy(fast_retry_policy())
            .soft_timeout_seconds(1)
            .hard_timeout_seconds(2)
            .build();

        let job_id = queue
            .enqueue(Job::new(JobKind::CleanupExpired, serde_json::json!({})))
            .await
            .unwrap();

        pool.start().await;
        sleep(Duration::from_millis(2600)).await;
        pool.stop().await;

        let job = queue.get_job(&job_id).await.unwrap().unwrap();
        assert!(job.attempt >= 1);
    }

    #[tokio::test]
    async fn test_unregistered_kind_fails_terminally() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let registry = HandlerRegistry::new();
        let pool = WorkerPool::builder(queue.clone(), registry)
            .worker_count(1)
            .poll_interval_ms(20)
            .build();

        let job_id = queue
            .enqueue(Job::new(JobKind::ScanFile, serde_json::json!({})))
            .await
            .unwrap();

        pool.start().await;
        sleep(Duration::from_millis(300)).await;
        pool.stop().await;

        let job = queue.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
    }
}
