use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use jobd_core::models::{Job, JobKind, ReassembleUploadPayload};
use jobd_core::traits::{CancelToken, ExecutionOutcome, JobHandler};
use jobd_core::{JobdError, JobdResult};
use jobd_domain::{FinalizeResult, UploadReassembler};

/// 分块合并处理器
///
/// 合并顺序与崩溃恢复语义都在领域服务内：原始分块在确认成功前一直
/// 保留，重放要么续跑要么直接确认（会话已清理）。
pub struct ReassembleUploadHandler {
    reassembler: Arc<UploadReassembler>,
}

impl ReassembleUploadHandler {
    pub fn new(reassembler: Arc<UploadReassembler>) -> Self {
        Self { reassembler }
    }
}

#[async_trait]
impl JobHandler for ReassembleUploadHandler {
    fn kind(&self) -> JobKind {
        JobKind::ReassembleUpload
    }

    async fn execute(&self, job: &Job, _cancel: &CancelToken) -> JobdResult<ExecutionOutcome> {
        let payload: ReassembleUploadPayload = match job.parse_payload() {
            Ok(payload) => payload,
            Err(e) => return Ok(ExecutionOutcome::permanent(format!("载荷解析失败: {e}"))),
        };

        match self.reassembler.finalize(&payload.upload_id).await {
            Ok(FinalizeResult::Completed { size_bytes }) => {
                info!(
                    upload_id = %payload.upload_id,
                    tenant_id = %payload.tenant_id,
                    size_bytes = size_bytes,
                    "upload reassembled"
                );
                Ok(ExecutionOutcome::Success)
            }
            Ok(FinalizeResult::AlreadyDone) => Ok(ExecutionOutcome::Success),
            // 分块不全等参数问题无法通过重试恢复
            Err(e @ JobdError::InvalidJobParams(_)) => {
                Ok(ExecutionOutcome::permanent(e.to_string()))
            }
            // 磁盘与存储错误可重试，分块仍然在
            Err(e) => Ok(ExecutionOutcome::transient(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobd_core::models::UploadSession;
    use jobd_core::traits::JobQueue;
    use jobd_domain::QuotaLedger;
    use jobd_infrastructure::{
        InMemoryFileStore, InMemoryJobQueue, InMemoryUploadSessionRepository,
        InMemoryUsageRepository, LocalChunkStore,
    };

    async fn fixture() -> (ReassembleUploadHandler, Arc<InMemoryJobQueue>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(InMemoryUploadSessionRepository::new());
        let chunks = Arc::new(LocalChunkStore::new(
            dir.path().join("chunks"),
            dir.path().join("files"),
        ));
        let files = Arc::new(InMemoryFileStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let ledger = Arc::new(QuotaLedger::new(Arc::new(InMemoryUsageRepository::new()) as _));
        let reassembler = Arc::new(UploadReassembler::new(
            sessions.clone(),
            chunks,
            files,
            queue.clone(),
            ledger,
        ));

        reassembler
            .begin_session(UploadSession::new(
                "u-1".to_string(),
                "t-1".to_string(),
                2,
                "out.bin".to_string(),
                "application/octet-stream".to_string(),
                None,
            ))
            .await
            .unwrap();
        reassembler.submit_chunk("u-1", 0, 2, b"AA").await.unwrap();
        reassembler.submit_chunk("u-1", 1, 2, b"BB").await.unwrap();

        (ReassembleUploadHandler::new(reassembler), queue, dir)
    }

    fn job(upload_id: &str) -> Job {
        Job::reassemble_upload(&ReassembleUploadPayload {
            upload_id: upload_id.to_string(),
            tenant_id: "t-1".to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_finalize_then_replay_is_idempotent() {
        let (handler, queue, _dir) = fixture().await;
        // 完成集合时重组器已入队一个合并任务
        let enqueued = queue
            .dequeue(std::time::Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(enqueued.kind, JobKind::ReassembleUpload);

        let outcome = handler
            .execute(&job("u-1"), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::Success);

        // 重放：会话已清理，直接确认
        let outcome = handler
            .execute(&job("u-1"), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::Success);
    }
}
