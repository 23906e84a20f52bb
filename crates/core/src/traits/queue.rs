use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::JobdResult;
use crate::models::Job;

/// nack 的处置结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackDisposition {
    /// 已按退避间隔重新入队
    Retried { next_run_at: DateTime<Utc> },
    /// 重试次数耗尽，任务已进入终态 Failed
    Exhausted,
}

/// 任务队列接口
///
/// 投递语义为至少一次：已取出但未确认的任务在可见性超时后重新可见，
/// 处理器必须幂等，或以持久实体的状态作为去重依据。入队从不因消费者
/// 不可用而阻塞。
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// 任务入队，按 `next_run_at` 支持延迟投递，返回任务ID
    async fn enqueue(&self, job: Job) -> JobdResult<String>;

    /// 取出一个就绪任务（非阻塞轮询）
    ///
    /// 取出的任务在 `visibility_timeout` 内不会被其他消费者看到；
    /// 超时未确认则重新可见（不递增尝试次数）。
    async fn dequeue(&self, visibility_timeout: Duration) -> JobdResult<Option<Job>>;

    /// 确认任务成功，任务进入终态 Succeeded
    async fn ack(&self, job_id: &str) -> JobdResult<()>;

    /// 否定确认：尝试次数加一后按 `retry_after` 延迟重新入队；
    /// 次数耗尽时进入终态 Failed
    async fn nack(&self, job_id: &str, retry_after: Duration) -> JobdResult<NackDisposition>;

    /// 永久失败：跳过重试，任务直接进入终态 Failed
    async fn fail(&self, job_id: &str, reason: &str) -> JobdResult<()>;

    /// 按ID查询任务（含终态任务，用于状态轮询）
    async fn get_job(&self, job_id: &str) -> JobdResult<Option<Job>>;

    /// 当前待处理任务数（就绪 + 延迟 + 执行中）
    async fn depth(&self) -> JobdResult<u64>;
}
