use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use jobd_core::traits::{AssembledFile, ChunkStore};
use jobd_core::{JobdError, JobdResult};

/// 本地磁盘分块存储
///
/// 每次上传一个目录，分块按 `chunk_<编号>` 命名；合并产物先写入
/// `.part` 临时文件再原子重命名，半成品不会被当成已合并的最终文件。
/// 分块目录在合并任务确认成功前一直保留。
#[derive(Debug, Clone)]
pub struct LocalChunkStore {
    chunk_root: PathBuf,
    final_root: PathBuf,
}

impl LocalChunkStore {
    pub fn new(chunk_root: impl Into<PathBuf>, final_root: impl Into<PathBuf>) -> Self {
        Self {
            chunk_root: chunk_root.into(),
            final_root: final_root.into(),
        }
    }

    fn upload_dir(&self, upload_id: &str) -> PathBuf {
        self.chunk_root.join(upload_id)
    }

    fn chunk_path(&self, upload_id: &str, chunk_number: u32) -> PathBuf {
        self.upload_dir(upload_id).join(format!("chunk_{chunk_number}"))
    }

    fn final_path(&self, upload_id: &str, target_filename: &str) -> PathBuf {
        self.final_root.join(format!("{upload_id}_{target_filename}"))
    }
}

#[async_trait]
impl ChunkStore for LocalChunkStore {
    async fn save_chunk(&self, upload_id: &str, chunk_number: u32, bytes: &[u8]) -> JobdResult<()> {
        fs::create_dir_all(self.upload_dir(upload_id)).await?;
        // 重复提交同一编号为覆盖写
        fs::write(self.chunk_path(upload_id, chunk_number), bytes).await?;
        debug!(
            upload_id = upload_id,
            chunk_number = chunk_number,
            size = bytes.len(),
            "chunk saved"
        );
        Ok(())
    }

    async fn assemble(
        &self,
        upload_id: &str,
        total_chunks: u32,
        target_filename: &str,
    ) -> JobdResult<AssembledFile> {
        fs::create_dir_all(&self.final_root).await?;
        let final_path = self.final_path(upload_id, target_filename);
        let part_path = final_path.with_extension("part");

        let mut output = fs::File::create(&part_path).await?;
        let mut size_bytes = 0i64;
        for chunk_number in 0..total_chunks {
            let chunk_path = self.chunk_path(upload_id, chunk_number);
            let bytes = fs::read(&chunk_path).await.map_err(|e| {
                JobdError::Storage(format!(
                    "读取分块失败: {} - {e}",
                    chunk_path.display()
                ))
            })?;
            size_bytes += bytes.len() as i64;
            output.write_all(&bytes).await?;
        }
        output.flush().await?;
        drop(output);

        fs::rename(&part_path, &final_path).await?;
        debug!(
            upload_id = upload_id,
            path = %final_path.display(),
            size_bytes = size_bytes,
            "chunks assembled"
        );
        Ok(AssembledFile {
            path: final_path,
            size_bytes,
        })
    }

    async fn final_file(
        &self,
        upload_id: &str,
        target_filename: &str,
    ) -> JobdResult<Option<AssembledFile>> {
        let path = self.final_path(upload_id, target_filename);
        match fs::metadata(&path).await {
            Ok(metadata) => Ok(Some(AssembledFile {
                path,
                size_bytes: metadata.len() as i64,
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_chunks(&self, upload_id: &str) -> JobdResult<()> {
        let dir = self.upload_dir(upload_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
