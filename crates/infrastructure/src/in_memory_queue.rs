use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use jobd_core::models::{Job, JobState};
use jobd_core::traits::{JobQueue, NackDisposition};
use jobd_core::{JobdError, JobdResult};

/// 内存任务队列
///
/// 面向嵌入式部署的队列实现，投递语义为至少一次：
/// - 入队按 `next_run_at` 支持延迟投递，从不因消费者不可用而阻塞
/// - 取出的任务在可见性超时内对其他消费者不可见，超时未确认则重新
///   可见（不递增尝试次数）
/// - nack 递增尝试次数并按退避延迟重投，次数耗尽进入终态 Failed
/// - 终态任务保留在簿记中供状态轮询
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    inner: Mutex<QueueInner>,
}

#[derive(Debug, Default)]
struct QueueInner {
    /// 就绪任务，近似先进先出
    ready: VecDeque<String>,
    /// 延迟任务，按到期时间排序
    delayed: BTreeMap<(DateTime<Utc>, String), ()>,
    /// 执行中任务 -> 可见性截止时间
    in_flight: HashMap<String, DateTime<Utc>>,
    /// 全部任务簿记（含终态）
    jobs: HashMap<String, Job>,
}

impl QueueInner {
    /// 将到期的延迟任务和可见性超时的执行中任务移回就绪队列
    fn promote_due(&mut self, now: DateTime<Utc>) {
        while let Some(entry) = self.delayed.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let ((_, job_id), _) = entry.remove_entry();
            self.ready.push_back(job_id);
        }

        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            self.in_flight.remove(&id);
            if let Some(job) = self.jobs.get_mut(&id) {
                warn!(job_id = %id, kind = %job.kind, "visibility timeout elapsed, job redelivered");
                job.update_state(JobState::Pending);
            }
            self.ready.push_back(id);
        }
    }

    fn depth(&self) -> u64 {
        (self.ready.len() + self.delayed.len() + self.in_flight.len()) as u64
    }
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> JobdResult<std::sync::MutexGuard<'_, QueueInner>> {
        self.inner
            .lock()
            .map_err(|_| JobdError::MessageQueue("队列内部锁已损坏".to_string()))
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: Job) -> JobdResult<String> {
        let job_id = job.id.clone();
        let mut inner = self.lock()?;
        if job.next_run_at <= Utc::now() {
            inner.ready.push_back(job_id.clone());
        } else {
            inner.delayed.insert((job.next_run_at, job_id.clone()), ());
        }
        debug!(job_id = %job_id, kind = %job.kind, "job enqueued");
        inner.jobs.insert(job_id.clone(), job);
        Ok(job_id)
    }

    async fn dequeue(&self, visibility_timeout: Duration) -> JobdResult<Option<Job>> {
        let now = Utc::now();
        let mut inner = self.lock()?;
        inner.promote_due(now);

        let deadline = now
            + chrono::Duration::from_std(visibility_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
        while let Some(job_id) = inner.ready.pop_front() {
            let snapshot = match inner.jobs.get_mut(&job_id) {
                // ack/fail 可能在重投后到达，终态任务直接跳过
                Some(job) if job.is_terminal() => continue,
                Some(job) => {
                    job.update_state(JobState::Running);
                    job.clone()
                }
                None => continue,
            };
            inner.in_flight.insert(job_id, deadline);
            return Ok(Some(snapshot));
        }
        Ok(None)
    }

    async fn ack(&self, job_id: &str) -> JobdResult<()> {
        let mut inner = self.lock()?;
        inner.in_flight.remove(job_id);
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| JobdError::JobNotFound {
                id: job_id.to_string(),
            })?;
        job.update_state(JobState::Succeeded);
        debug!(job_id = %job_id, kind = %job.kind, "job acked");
        Ok(())
    }

    async fn nack(&self, job_id: &str, retry_after: Duration) -> JobdResult<NackDisposition> {
        let mut inner = self.lock()?;
        inner.in_flight.remove(job_id);
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| JobdError::JobNotFound {
                id: job_id.to_string(),
            })?;

        // 终态任务不再变更
        if job.is_terminal() {
            return Ok(NackDisposition::Exhausted);
        }

        job.attempt += 1;
        if job.attempts_exhausted() {
            if job.last_error.is_none() {
                job.last_error = Some("重试次数耗尽".to_string());
            }
            job.update_state(JobState::Failed);
            info!(
                job_id = %job_id,
                kind = %job.kind,
                attempt = job.attempt,
                "job failed terminally after exhausting retries"
            );
            return Ok(NackDisposition::Exhausted);
        }

        let next_run_at =
            Utc::now() + chrono::Duration::from_std(retry_after).unwrap_or_else(|_| {
                chrono::Duration::seconds(60)
            });
        job.next_run_at = next_run_at;
        job.update_state(JobState::Retrying);
        let key = (next_run_at, job_id.to_string());
        debug!(
            job_id = %job_id,
            kind = %job.kind,
            attempt = job.attempt,
            next_run_at = %next_run_at,
            "job nacked for retry"
        );
        inner.delayed.insert(key, ());
        Ok(NackDisposition::Retried { next_run_at })
    }

    async fn fail(&self, job_id: &str, reason: &str) -> JobdResult<()> {
        let mut inner = self.lock()?;
        inner.in_flight.remove(job_id);
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| JobdError::JobNotFound {
                id: job_id.to_string(),
            })?;
        if job.is_terminal() {
            return Ok(());
        }
        job.last_error = Some(reason.to_string());
        job.update_state(JobState::Failed);
        info!(job_id = %job_id, kind = %job.kind, reason = reason, "job failed permanently");
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> JobdResult<Option<Job>> {
        let inner = self.lock()?;
        Ok(inner.jobs.get(job_id).cloned())
    }

    async fn depth(&self) -> JobdResult<u64> {
        let inner = self.lock()?;
        Ok(inner.depth())
    }
}
