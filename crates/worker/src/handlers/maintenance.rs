use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use jobd_core::models::{
    CleanupExpiredPayload, CleanupScope, Job, JobKind, ResetUsagePayload, UsagePeriod,
};
use jobd_core::traits::{CancelToken, ExecutionOutcome, ExpiryStore, JobHandler};
use jobd_core::JobdResult;
use jobd_domain::{QuotaLedger, UploadReassembler};

/// 月度用量重置处理器
///
/// 清零指定账期（缺省为当前账期）的计数，不触碰其他账期的历史。
/// 清零是幂等的，重放无副作用。
pub struct ResetMonthlyUsageHandler {
    ledger: Arc<QuotaLedger>,
}

impl ResetMonthlyUsageHandler {
    pub fn new(ledger: Arc<QuotaLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl JobHandler for ResetMonthlyUsageHandler {
    fn kind(&self) -> JobKind {
        JobKind::ResetMonthlyUsage
    }

    async fn execute(&self, job: &Job, _cancel: &CancelToken) -> JobdResult<ExecutionOutcome> {
        let payload: ResetUsagePayload = match job.parse_payload() {
            Ok(payload) => payload,
            Err(e) => return Ok(ExecutionOutcome::permanent(format!("载荷解析失败: {e}"))),
        };
        let period_key = payload
            .period_key
            .unwrap_or_else(UsagePeriod::current_period_key);
        let rows = self.ledger.reset_period(&period_key).await?;
        info!(period_key = %period_key, rows = rows, "monthly usage reset completed");
        Ok(ExecutionOutcome::Success)
    }
}

/// 过期数据清理处理器
///
/// 按载荷范围分派：上传会话在本核心内回收，令牌与分享链接委托给
/// 外部持久层的清理接口。
pub struct CleanupExpiredHandler {
    reassembler: Arc<UploadReassembler>,
    session_ttl_hours: i64,
    tokens: Arc<dyn ExpiryStore>,
    shares: Arc<dyn ExpiryStore>,
}

impl CleanupExpiredHandler {
    pub fn new(
        reassembler: Arc<UploadReassembler>,
        session_ttl_hours: i64,
        tokens: Arc<dyn ExpiryStore>,
        shares: Arc<dyn ExpiryStore>,
    ) -> Self {
        Self {
            reassembler,
            session_ttl_hours,
            tokens,
            shares,
        }
    }
}

#[async_trait]
impl JobHandler for CleanupExpiredHandler {
    fn kind(&self) -> JobKind {
        JobKind::CleanupExpired
    }

    async fn execute(&self, job: &Job, _cancel: &CancelToken) -> JobdResult<ExecutionOutcome> {
        let payload: CleanupExpiredPayload = match job.parse_payload() {
            Ok(payload) => payload,
            Err(e) => return Ok(ExecutionOutcome::permanent(format!("载荷解析失败: {e}"))),
        };

        let purged = match payload.scope {
            CleanupScope::UploadSessions => {
                self.reassembler
                    .reclaim_expired(self.session_ttl_hours)
                    .await?
            }
            CleanupScope::Tokens => self.tokens.purge_expired(Utc::now()).await?,
            CleanupScope::Shares => self.shares.purge_expired(Utc::now()).await?,
        };
        info!(scope = ?payload.scope, purged = purged, "expired records cleaned");
        Ok(ExecutionOutcome::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use jobd_core::models::{UploadSession, UsageField};
    use jobd_core::traits::{UploadSessionRepository, UsageRepository};
    use jobd_infrastructure::{
        InMemoryExpiryStore, InMemoryFileStore, InMemoryJobQueue,
        InMemoryUploadSessionRepository, InMemoryUsageRepository, LocalChunkStore,
    };

    #[tokio::test]
    async fn test_reset_zeroes_requested_period_only() {
        let usage = Arc::new(InMemoryUsageRepository::new());
        let ledger = Arc::new(QuotaLedger::new(usage.clone() as Arc<dyn UsageRepository>));
        ledger
            .debit("t-1", "2023-12", UsageField::EmailsSent, 4)
            .await
            .unwrap();
        ledger
            .debit("t-1", "2024-01", UsageField::EmailsSent, 9)
            .await
            .unwrap();

        let handler = ResetMonthlyUsageHandler::new(ledger);
        let job = Job::reset_monthly_usage(&ResetUsagePayload {
            period_key: Some("2024-01".to_string()),
        })
        .unwrap();
        let outcome = handler.execute(&job, &CancelToken::new()).await.unwrap();

        assert_eq!(outcome, ExecutionOutcome::Success);
        assert_eq!(
            usage.get("t-1", "2024-01").await.unwrap().unwrap().emails_sent,
            0
        );
        assert_eq!(
            usage.get("t-1", "2023-12").await.unwrap().unwrap().emails_sent,
            4
        );
    }

    #[tokio::test]
    async fn test_cleanup_dispatches_by_scope() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(InMemoryUploadSessionRepository::new());
        let reassembler = Arc::new(UploadReassembler::new(
            sessions.clone(),
            Arc::new(LocalChunkStore::new(
                dir.path().join("chunks"),
                dir.path().join("files"),
            )),
            Arc::new(InMemoryFileStore::new()),
            Arc::new(InMemoryJobQueue::new()),
            Arc::new(QuotaLedger::new(Arc::new(InMemoryUsageRepository::new()) as _)),
        ));

        let mut stale = UploadSession::new(
            "u-stale".to_string(),
            "t-1".to_string(),
            3,
            "a.bin".to_string(),
            "application/octet-stream".to_string(),
            None,
        );
        stale.created_at = Utc::now() - Duration::hours(48);
        reassembler.begin_session(stale).await.unwrap();

        let tokens = Arc::new(InMemoryExpiryStore::new());
        tokens.insert(Utc::now() - Duration::hours(1)).await;
        tokens.insert(Utc::now() + Duration::hours(1)).await;
        let shares = Arc::new(InMemoryExpiryStore::new());
        shares.insert(Utc::now() - Duration::days(2)).await;

        let handler = CleanupExpiredHandler::new(
            reassembler,
            24,
            tokens.clone() as Arc<dyn ExpiryStore>,
            shares.clone() as Arc<dyn ExpiryStore>,
        );

        let job = Job::cleanup_expired(CleanupScope::UploadSessions).unwrap();
        handler.execute(&job, &CancelToken::new()).await.unwrap();
        assert!(sessions.get("u-stale").await.unwrap().is_none());

        let job = Job::cleanup_expired(CleanupScope::Tokens).unwrap();
        handler.execute(&job, &CancelToken::new()).await.unwrap();
        assert_eq!(tokens.remaining().await, 1);

        let job = Job::cleanup_expired(CleanupScope::Shares).unwrap();
        handler.execute(&job, &CancelToken::new()).await.unwrap();
        assert_eq!(shares.remaining().await, 0);
    }
}
