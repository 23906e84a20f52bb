use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use jobd_core::models::{Job, ReassembleUploadPayload, UploadSession, UsageField, UsagePeriod};
use jobd_core::traits::{ChunkStore, FileStore, JobQueue, UploadSessionRepository};
use jobd_core::{JobdError, JobdResult};

use crate::quota::QuotaLedger;

/// 分块提交后的会话状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChunkSubmitStatus {
    #[serde(rename = "uploading")]
    Uploading,
    #[serde(rename = "complete")]
    Complete,
}

/// 分块提交响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSubmitResponse {
    pub status: ChunkSubmitStatus,
    pub chunks_received: u32,
    pub total_chunks: u32,
}

/// 合并结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeResult {
    /// 本次完成合并
    Completed { size_bytes: i64 },
    /// 会话已不存在，此前的执行已完成全部清理（重放场景）
    AlreadyDone,
}

/// 分块上传重组器
///
/// 会话状态机：收集中 → 完成 →（经合并任务）→ 删除。
/// 完成转移由使集合变满的那次插入触发，恰好一次，由会话存储在并发
/// 提交下保证。清理顺序固定：合并产物落盘 → 存储入账 → 删除分块 →
/// 删除会话；合并任务确认成功前分块一直保留，崩溃后重放无数据丢失。
pub struct UploadReassembler {
    sessions: Arc<dyn UploadSessionRepository>,
    chunks: Arc<dyn ChunkStore>,
    files: Arc<dyn FileStore>,
    queue: Arc<dyn JobQueue>,
    ledger: Arc<QuotaLedger>,
}

impl UploadReassembler {
    pub fn new(
        sessions: Arc<dyn UploadSessionRepository>,
        chunks: Arc<dyn ChunkStore>,
        files: Arc<dyn FileStore>,
        queue: Arc<dyn JobQueue>,
        ledger: Arc<QuotaLedger>,
    ) -> Self {
        Self {
            sessions,
            chunks,
            files,
            queue,
            ledger,
        }
    }

    /// 创建上传会话
    ///
    /// 会话必须先于分块提交显式创建；被TTL回收后迟到的分块会因会话
    /// 不存在被拒绝，客户端需要重新发起上传。
    pub async fn begin_session(&self, session: UploadSession) -> JobdResult<()> {
        if session.total_chunks == 0 {
            return Err(JobdError::InvalidJobParams(
                "total_chunks 必须大于0".to_string(),
            ));
        }
        info!(
            upload_id = %session.upload_id,
            tenant_id = %session.tenant_id,
            total_chunks = session.total_chunks,
            "upload session started"
        );
        self.sessions.insert(session).await
    }

    /// 提交一个分块
    ///
    /// 分块字节先落盘再记录编号；重复提交同一编号为覆盖写，集合不变。
    /// 使集合变满的那次提交入队一个合并任务。
    pub async fn submit_chunk(
        &self,
        upload_id: &str,
        chunk_number: u32,
        total_chunks: u32,
        bytes: &[u8],
    ) -> JobdResult<ChunkSubmitResponse> {
        let session = self
            .sessions
            .get(upload_id)
            .await?
            .ok_or_else(|| JobdError::SessionNotFound {
                upload_id: upload_id.to_string(),
            })?;

        if total_chunks != session.total_chunks {
            return Err(JobdError::InvalidJobParams(format!(
                "total_chunks 与会话不一致: {total_chunks} != {}",
                session.total_chunks
            )));
        }
        if chunk_number >= session.total_chunks {
            return Err(JobdError::ChunkOutOfRange {
                chunk_number,
                total_chunks: session.total_chunks,
            });
        }

        self.chunks
            .save_chunk(upload_id, chunk_number, bytes)
            .await?;

        let record = self.sessions.record_chunk(upload_id, chunk_number).await?;
        debug!(
            upload_id = upload_id,
            chunk_number = chunk_number,
            chunks_received = record.chunks_received,
            total_chunks = record.total_chunks,
            "chunk recorded"
        );

        if record.completed_now {
            let job = Job::reassemble_upload(&ReassembleUploadPayload {
                upload_id: upload_id.to_string(),
                tenant_id: session.tenant_id.clone(),
            })?;
            let job_id = self.queue.enqueue(job).await?;
            info!(
                upload_id = upload_id,
                job_id = %job_id,
                "upload complete, reassembly job enqueued"
            );
        }

        Ok(ChunkSubmitResponse {
            status: if record.chunks_received == record.total_chunks {
                ChunkSubmitStatus::Complete
            } else {
                ChunkSubmitStatus::Uploading
            },
            chunks_received: record.chunks_received,
            total_chunks: record.total_chunks,
        })
    }

    /// 执行合并（由 ReassembleUpload 任务处理器调用）
    ///
    /// 顺序：按编号升序拼接 → 登记文件 → 存储入账 → 删除分块 → 删除会话。
    /// 会话已不存在说明此前的执行已完成全部清理，重放直接成功；
    /// 合并产物已存在时跳过拼接，继续完成剩余清理。
    pub async fn finalize(&self, upload_id: &str) -> JobdResult<FinalizeResult> {
        let session = match self.sessions.get(upload_id).await? {
            Some(session) => session,
            None => {
                debug!(upload_id = upload_id, "session already finalized");
                return Ok(FinalizeResult::AlreadyDone);
            }
        };

        if !session.is_complete() {
            return Err(JobdError::InvalidJobParams(format!(
                "会话未收齐分块: {}/{}",
                session.chunks_received(),
                session.total_chunks
            )));
        }

        let assembled = match self
            .chunks
            .final_file(upload_id, &session.target_filename)
            .await?
        {
            Some(existing) => {
                debug!(upload_id = upload_id, "final file already assembled");
                existing
            }
            None => {
                self.chunks
                    .assemble(upload_id, session.total_chunks, &session.target_filename)
                    .await?
            }
        };

        self.files
            .register_file(&session.tenant_id, &assembled.path, assembled.size_bytes)
            .await?;

        let period_key = UsagePeriod::current_period_key();
        self.ledger
            .debit(
                &session.tenant_id,
                &period_key,
                UsageField::StorageBytes,
                assembled.size_bytes,
            )
            .await?;

        self.chunks.delete_chunks(upload_id).await?;
        self.sessions.delete(upload_id).await?;

        info!(
            upload_id = upload_id,
            tenant_id = %session.tenant_id,
            size_bytes = assembled.size_bytes,
            "upload finalized"
        );
        Ok(FinalizeResult::Completed {
            size_bytes: assembled.size_bytes,
        })
    }

    /// 回收超过TTL仍未完成的会话，返回回收数量
    ///
    /// 回收删除分块与会话；此后迟到的分块会收到会话不存在的错误。
    pub async fn reclaim_expired(&self, ttl_hours: i64) -> JobdResult<u64> {
        let cutoff = Utc::now() - Duration::hours(ttl_hours);
        let expired = self.sessions.created_before(cutoff).await?;
        let mut reclaimed = 0u64;
        for session in expired {
            if let Err(e) = self.chunks.delete_chunks(&session.upload_id).await {
                warn!(
                    upload_id = %session.upload_id,
                    error = %e,
                    "failed to delete chunks of expired session"
                );
                continue;
            }
            self.sessions.delete(&session.upload_id).await?;
            reclaimed += 1;
            info!(
                upload_id = %session.upload_id,
                tenant_id = %session.tenant_id,
                "expired upload session reclaimed"
            );
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobd_core::models::JobKind;
    use jobd_core::traits::{JobQueue, UploadSessionRepository, UsageRepository};
    use jobd_infrastructure::{
        InMemoryFileStore, InMemoryJobQueue, InMemoryUploadSessionRepository,
        InMemoryUsageRepository, LocalChunkStore,
    };

    struct Fixture {
        reassembler: UploadReassembler,
        queue: Arc<InMemoryJobQueue>,
        sessions: Arc<InMemoryUploadSessionRepository>,
        usage: Arc<InMemoryUsageRepository>,
        files: Arc<InMemoryFileStore>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(InMemoryUploadSessionRepository::new());
        let chunks = Arc::new(LocalChunkStore::new(
            dir.path().join("chunks"),
            dir.path().join("files"),
        ));
        let files = Arc::new(InMemoryFileStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let usage = Arc::new(InMemoryUsageRepository::new());
        let ledger = Arc::new(QuotaLedger::new(usage.clone() as Arc<dyn UsageRepository>));
        let reassembler = UploadReassembler::new(
            sessions.clone(),
            chunks,
            files.clone(),
            queue.clone(),
            ledger,
        );
        Fixture {
            reassembler,
            queue,
            sessions,
            usage,
            files,
            _dir: dir,
        }
    }

    fn session(upload_id: &str, total: u32) -> UploadSession {
        UploadSession::new(
            upload_id.to_string(),
            "t-1".to_string(),
            total,
            "report.bin".to_string(),
            "application/octet-stream".to_string(),
            None,
        )
    }

    #[tokio::test]
    async fn test_chunk_for_unknown_session_rejected() {
        let f = fixture();
        let err = f
            .reassembler
            .submit_chunk("missing", 0, 3, b"data")
            .await
            .unwrap_err();
        assert!(matches!(err, JobdError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_completion_enqueues_reassembly_exactly_once() {
        let f = fixture();
        f.reassembler
            .begin_session(session("u-1", 3))
            .await
            .unwrap();

        // 乱序提交 {1, 0, 2}
        let r = f.reassembler.submit_chunk("u-1", 1, 3, b"BBB").await.unwrap();
        assert_eq!(r.status, ChunkSubmitStatus::Uploading);
        assert_eq!(r.chunks_received, 1);

        let r = f.reassembler.submit_chunk("u-1", 0, 3, b"AAA").await.unwrap();
        assert_eq!(r.status, ChunkSubmitStatus::Uploading);

        let r = f.reassembler.submit_chunk("u-1", 2, 3, b"CC").await.unwrap();
        assert_eq!(r.status, ChunkSubmitStatus::Complete);
        assert_eq!(r.chunks_received, 3);

        assert_eq!(f.queue.depth().await.unwrap(), 1);

        // 完成后的重复提交不再触发第二个合并任务
        let r = f.reassembler.submit_chunk("u-1", 2, 3, b"CC").await.unwrap();
        assert_eq!(r.status, ChunkSubmitStatus::Complete);
        assert_eq!(f.queue.depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resubmitted_chunk_leaves_set_unchanged() {
        let f = fixture();
        f.reassembler
            .begin_session(session("u-1", 3))
            .await
            .unwrap();
        for _ in 0..4 {
            f.reassembler.submit_chunk("u-1", 1, 3, b"BBB").await.unwrap();
        }
        let stored = f.sessions.get("u-1").await.unwrap().unwrap();
        assert_eq!(stored.chunks_received(), 1);
    }

    #[tokio::test]
    async fn test_finalize_concatenates_in_chunk_order() {
        let f = fixture();
        f.reassembler
            .begin_session(session("u-1", 3))
            .await
            .unwrap();
        // 到达顺序 {1, 0, 2}，拼接结果必须按编号 0,1,2
        f.reassembler.submit_chunk("u-1", 1, 3, b"BBB").await.unwrap();
        f.reassembler.submit_chunk("u-1", 0, 3, b"AAA").await.unwrap();
        f.reassembler.submit_chunk("u-1", 2, 3, b"CC").await.unwrap();

        let result = f.reassembler.finalize("u-1").await.unwrap();
        let FinalizeResult::Completed { size_bytes } = result else {
            panic!("expected completed finalize");
        };
        assert_eq!(size_bytes, 8);

        let registered = f.files.registered().await;
        assert_eq!(registered.len(), 1);
        let content = tokio::fs::read(&registered[0].path).await.unwrap();
        assert_eq!(content, b"AAABBBCC");

        // 存储用量在成功后入账
        let period = UsagePeriod::current_period_key();
        let usage = f.usage.get("t-1", &period).await.unwrap().unwrap();
        assert_eq!(usage.storage_bytes, 8);

        // 会话已删除，重放直接成功且不再入账
        let replay = f.reassembler.finalize("u-1").await.unwrap();
        assert_eq!(replay, FinalizeResult::AlreadyDone);
        let usage = f.usage.get("t-1", &period).await.unwrap().unwrap();
        assert_eq!(usage.storage_bytes, 8);
    }

    #[tokio::test]
    async fn test_racing_final_chunks_complete_once() {
        let f = fixture();
        f.reassembler
            .begin_session(session("u-1", 2))
            .await
            .unwrap();
        f.reassembler.submit_chunk("u-1", 0, 2, b"AA").await.unwrap();

        let reassembler = Arc::new(f.reassembler);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let reassembler = Arc::clone(&reassembler);
            handles.push(tokio::spawn(async move {
                reassembler.submit_chunk("u-1", 1, 2, b"BB").await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // 竞争提交最后一块，合并任务只入队一次
        assert_eq!(f.queue.depth().await.unwrap(), 1);
        let job = f
            .queue
            .dequeue(std::time::Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.kind, JobKind::ReassembleUpload);
        assert!(f
            .queue
            .dequeue(std::time::Duration::from_secs(30))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_reclaim_expired_sessions() {
        let f = fixture();
        let mut old = session("u-old", 3);
        old.created_at = Utc::now() - Duration::hours(30);
        f.reassembler.begin_session(old).await.unwrap();
        f.reassembler
            .begin_session(session("u-new", 3))
            .await
            .unwrap();
        f.reassembler
            .submit_chunk("u-old", 0, 3, b"AAA")
            .await
            .unwrap();

        let reclaimed = f.reassembler.reclaim_expired(24).await.unwrap();
        assert_eq!(reclaimed, 1);

        // 被回收会话的迟到分块要求客户端重新上传
        let err = f
            .reassembler
            .submit_chunk("u-old", 1, 3, b"BBB")
            .await
            .unwrap_err();
        assert!(matches!(err, JobdError::SessionNotFound { .. }));

        // 未过期会话不受影响
        assert!(f.sessions.get("u-new").await.unwrap().is_some());
    }
}
