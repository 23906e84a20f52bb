use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use jobd_core::models::{
    CleanupExpiredPayload, Job, JobKind, JobState, PlanLimits, ReassembleUploadPayload,
    ResetUsagePayload, ScanFilePayload, SendEmailPayload, UploadSession, UsageField, UsagePeriod,
};
use jobd_core::traits::{JobQueue, PlanProvider};
use jobd_core::JobdResult;
use jobd_domain::{ChunkSubmitResponse, QuotaLedger, RateLimiter, UploadReassembler};

use crate::error::SubmitError;

/// 动作提交服务
///
/// 外部REST层的编程接口：提交动作前同步执行速率与配额准入，
/// 拒绝立即返回且不入队；放行后任务进入队列异步执行。
pub struct SubmissionService {
    queue: Arc<dyn JobQueue>,
    limiter: Arc<RateLimiter>,
    ledger: Arc<QuotaLedger>,
    plans: Arc<dyn PlanProvider>,
    reassembler: Arc<UploadReassembler>,
    rate_window_seconds: u64,
}

impl SubmissionService {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        limiter: Arc<RateLimiter>,
        ledger: Arc<QuotaLedger>,
        plans: Arc<dyn PlanProvider>,
        reassembler: Arc<UploadReassembler>,
        rate_window_seconds: u64,
    ) -> Self {
        Self {
            queue,
            limiter,
            ledger,
            plans,
            reassembler,
            rate_window_seconds,
        }
    }

    /// 提交一个动作，返回任务ID
    ///
    /// 邮件发送先过速率窗口再过月度配额；任一检查拒绝都同步返回
    /// 机器可读的原因，任务不入队。
    pub async fn submit_action(
        &self,
        tenant_id: &str,
        kind: JobKind,
        payload: serde_json::Value,
    ) -> Result<String, SubmitError> {
        validate_payload(kind, &payload)?;

        if kind == JobKind::SendEmail {
            self.admit_email(tenant_id).await?;
        }

        let job = Job::new(kind, payload);
        let job_id = self.queue.enqueue(job).await.map_err(SubmitError::from)?;
        info!(
            tenant_id = tenant_id,
            kind = %kind,
            job_id = %job_id,
            "action accepted"
        );
        Ok(job_id)
    }

    /// 查询任务状态
    pub async fn get_job_status(&self, job_id: &str) -> JobdResult<Option<JobState>> {
        Ok(self.queue.get_job(job_id).await?.map(|job| job.state))
    }

    /// 发起分块上传
    ///
    /// `declared_size_bytes` 用于套餐单文件大小与存储容量的准入检查；
    /// 实际入账以合并产物的字节数为准，在合并任务成功后发生。
    pub async fn begin_upload(
        &self,
        tenant_id: &str,
        total_chunks: u32,
        declared_size_bytes: u64,
        target_filename: &str,
        mime_type: &str,
        folder_id: Option<i64>,
    ) -> Result<String, SubmitError> {
        let limits = self.limits_for(tenant_id).await?;

        if !limits.max_upload_size_bytes.contains(declared_size_bytes) {
            return Err(SubmitError::QuotaExceeded {
                field: "upload_size_bytes".to_string(),
                current: declared_size_bytes as i64,
                limit: limits.max_upload_size_bytes.bound().unwrap_or(u64::MAX),
            });
        }

        let period_key = UsagePeriod::current_period_key();
        let within_storage = self
            .ledger
            .check_capacity_limit(
                tenant_id,
                &period_key,
                UsageField::StorageBytes,
                limits.storage_limit_bytes,
                declared_size_bytes,
            )
            .await
            .map_err(SubmitError::from)?;
        if !within_storage {
            let usage = self
                .ledger
                .read(tenant_id, &period_key)
                .await
                .map_err(SubmitError::from)?;
            return Err(SubmitError::QuotaExceeded {
                field: UsageField::StorageBytes.as_str().to_string(),
                current: usage.storage_bytes,
                limit: limits.storage_limit_bytes.bound().unwrap_or(u64::MAX),
            });
        }

        let upload_id = Uuid::new_v4().to_string();
        self.reassembler
            .begin_session(UploadSession::new(
                upload_id.clone(),
                tenant_id.to_string(),
                total_chunks,
                target_filename.to_string(),
                mime_type.to_string(),
                folder_id,
            ))
            .await
            .map_err(SubmitError::from)?;
        Ok(upload_id)
    }

    /// 提交一个分块
    pub async fn submit_chunk(
        &self,
        upload_id: &str,
        chunk_number: u32,
        total_chunks: u32,
        bytes: &[u8],
    ) -> Result<ChunkSubmitResponse, SubmitError> {
        self.reassembler
            .submit_chunk(upload_id, chunk_number, total_chunks, bytes)
            .await
            .map_err(SubmitError::from)
    }

    async fn limits_for(&self, tenant_id: &str) -> Result<PlanLimits, SubmitError> {
        let tier = self
            .plans
            .plan_for(tenant_id)
            .await
            .map_err(SubmitError::from)?;
        Ok(PlanLimits::for_tier(tier))
    }

    async fn admit_email(&self, tenant_id: &str) -> Result<(), SubmitError> {
        let limits = self.limits_for(tenant_id).await?;

        let admitted = self
            .limiter
            .admit(
                tenant_id,
                "email",
                limits.max_emails_per_minute,
                self.rate_window_seconds,
            )
            .await
            .map_err(SubmitError::from)?;
        if !admitted {
            let retry_after =
                RateLimiter::retry_after_seconds(Utc::now(), self.rate_window_seconds);
            debug!(tenant_id = tenant_id, "email submission rate limited");
            return Err(SubmitError::RateLimited {
                action: "email".to_string(),
                retry_after_seconds: retry_after,
            });
        }

        let period_key = UsagePeriod::current_period_key();
        let within_quota = self
            .ledger
            .check_count_limit(
                tenant_id,
                &period_key,
                UsageField::EmailsSent,
                limits.max_emails_per_month,
            )
            .await
            .map_err(SubmitError::from)?;
        if !within_quota {
            let usage = self
                .ledger
                .read(tenant_id, &period_key)
                .await
                .map_err(SubmitError::from)?;
            return Err(SubmitError::QuotaExceeded {
                field: UsageField::EmailsSent.as_str().to_string(),
                current: usage.emails_sent,
                limit: limits.max_emails_per_month.bound().unwrap_or(u64::MAX),
            });
        }
        Ok(())
    }
}

fn validate_payload(kind: JobKind, payload: &serde_json::Value) -> Result<(), SubmitError> {
    let result = match kind {
        JobKind::SendEmail => {
            serde_json::from_value::<SendEmailPayload>(payload.clone()).map(|_| ())
        }
        JobKind::ScanFile => serde_json::from_value::<ScanFilePayload>(payload.clone()).map(|_| ()),
        JobKind::ReassembleUpload => {
            serde_json::from_value::<ReassembleUploadPayload>(payload.clone()).map(|_| ())
        }
        JobKind::ResetMonthlyUsage => {
            serde_json::from_value::<ResetUsagePayload>(payload.clone()).map(|_| ())
        }
        JobKind::CleanupExpired => {
            serde_json::from_value::<CleanupExpiredPayload>(payload.clone()).map(|_| ())
        }
    };
    result.map_err(|e| SubmitError::Invalid(format!("载荷不合法: {e}")))
}
