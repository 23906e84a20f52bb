use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use jobd_core::models::{Job, JobKind, ScanFilePayload};
use jobd_core::traits::{
    CancelToken, ExecutionOutcome, FileStore, JobHandler, ScanVerdict, VirusScanner,
};
use jobd_core::JobdResult;

/// 病毒扫描处理器
///
/// 扫描的检测逻辑由外部引擎提供，这里只负责调度：取文件记录、
/// 调用引擎、回写结论。文件记录不存在为永久失败。
pub struct ScanFileHandler {
    files: Arc<dyn FileStore>,
    scanner: Arc<dyn VirusScanner>,
}

impl ScanFileHandler {
    pub fn new(files: Arc<dyn FileStore>, scanner: Arc<dyn VirusScanner>) -> Self {
        Self { files, scanner }
    }
}

#[async_trait]
impl JobHandler for ScanFileHandler {
    fn kind(&self) -> JobKind {
        JobKind::ScanFile
    }

    async fn execute(&self, job: &Job, cancel: &CancelToken) -> JobdResult<ExecutionOutcome> {
        let payload: ScanFilePayload = match job.parse_payload() {
            Ok(payload) => payload,
            Err(e) => return Ok(ExecutionOutcome::permanent(format!("载荷解析失败: {e}"))),
        };

        let file = match self.files.get(payload.file_id).await? {
            Some(file) => file,
            None => {
                return Ok(ExecutionOutcome::permanent(format!(
                    "文件记录不存在: {}",
                    payload.file_id
                )))
            }
        };

        if cancel.is_cancelled() {
            return Ok(ExecutionOutcome::transient("扫描前收到取消信号"));
        }

        let verdict = self.scanner.scan(&file.path).await?;
        self.files.set_scan_status(payload.file_id, verdict).await?;

        info!(
            tenant_id = %file.tenant_id,
            file_id = payload.file_id,
            verdict = ?verdict,
            "file scan completed"
        );
        Ok(ExecutionOutcome::Success)
    }

    async fn on_terminal_failure(&self, job: &Job) -> JobdResult<()> {
        let payload: ScanFilePayload = match job.parse_payload() {
            Ok(payload) => payload,
            Err(_) => return Ok(()),
        };
        if self.files.get(payload.file_id).await?.is_some() {
            self.files
                .set_scan_status(payload.file_id, ScanVerdict::ScanFailed)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobd_core::traits::StoredFile;
    use jobd_infrastructure::{ExtensionHeuristicScanner, InMemoryFileStore};

    fn fixture() -> (ScanFileHandler, Arc<InMemoryFileStore>, tempfile::TempDir) {
        let files = Arc::new(InMemoryFileStore::new());
        let handler = ScanFileHandler::new(files.clone(), Arc::new(ExtensionHeuristicScanner::new()));
        (handler, files, tempfile::tempdir().unwrap())
    }

    #[tokio::test]
    async fn test_scan_records_verdict() {
        let (handler, files, dir) = fixture();
        let path = dir.path().join("doc.txt");
        tokio::fs::write(&path, b"content").await.unwrap();
        files
            .insert(StoredFile {
                file_id: 1,
                tenant_id: "t-1".to_string(),
                path,
                size_bytes: 7,
            })
            .await;

        let job = Job::scan_file(&ScanFilePayload {
            tenant_id: "t-1".to_string(),
            file_id: 1,
        })
        .unwrap();
        let outcome = handler.execute(&job, &CancelToken::new()).await.unwrap();

        assert_eq!(outcome, ExecutionOutcome::Success);
        assert_eq!(files.scan_status(1).await, Some(ScanVerdict::Clean));
    }

    #[tokio::test]
    async fn test_missing_file_record_is_permanent() {
        let (handler, _files, _dir) = fixture();
        let job = Job::scan_file(&ScanFilePayload {
            tenant_id: "t-1".to_string(),
            file_id: 404,
        })
        .unwrap();
        let outcome = handler.execute(&job, &CancelToken::new()).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Permanent { .. }));
    }

    #[tokio::test]
    async fn test_missing_bytes_marked_scan_failed() {
        let (handler, files, dir) = fixture();
        files
            .insert(StoredFile {
                file_id: 1,
                tenant_id: "t-1".to_string(),
                path: dir.path().join("gone.bin"),
                size_bytes: 0,
            })
            .await;

        let job = Job::scan_file(&ScanFilePayload {
            tenant_id: "t-1".to_string(),
            file_id: 1,
        })
        .unwrap();
        let outcome = handler.execute(&job, &CancelToken::new()).await.unwrap();

        assert_eq!(outcome, ExecutionOutcome::Success);
        assert_eq!(files.scan_status(1).await, Some(ScanVerdict::ScanFailed));
    }

    #[tokio::test]
    async fn test_terminal_failure_records_scan_failed() {
        let (handler, files, dir) = fixture();
        files
            .insert(StoredFile {
                file_id: 1,
                tenant_id: "t-1".to_string(),
                path: dir.path().join("doc.txt"),
                size_bytes: 7,
            })
            .await;

        let job = Job::scan_file(&ScanFilePayload {
            tenant_id: "t-1".to_string(),
            file_id: 1,
        })
        .unwrap();
        handler.on_terminal_failure(&job).await.unwrap();
        assert_eq!(files.scan_status(1).await, Some(ScanVerdict::ScanFailed));
    }
}
