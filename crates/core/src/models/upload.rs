use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{JobdError, JobdResult};

/// 分块上传会话
///
/// 跟踪一次逻辑文件上传已收到的分块集合。不变量：
/// `received_chunk_numbers ⊆ [0, total_chunks)`。集合大小等于 `total_chunks`
/// 的那一刻会话完成，由完成它的那次插入触发合并任务，且只触发一次。
/// 会话在合并任务确认成功前不会被删除。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub upload_id: String,
    pub tenant_id: String,
    pub total_chunks: u32,
    pub received_chunk_numbers: BTreeSet<u32>,
    pub target_filename: String,
    pub mime_type: String,
    pub folder_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(
        upload_id: String,
        tenant_id: String,
        total_chunks: u32,
        target_filename: String,
        mime_type: String,
        folder_id: Option<i64>,
    ) -> Self {
        Self {
            upload_id,
            tenant_id,
            total_chunks,
            received_chunk_numbers: BTreeSet::new(),
            target_filename,
            mime_type,
            folder_id,
            created_at: Utc::now(),
        }
    }

    /// 记录一个分块，返回是否为新插入
    ///
    /// 重复提交同一编号是幂等的：集合不变，返回 false。
    pub fn record_chunk(&mut self, chunk_number: u32) -> JobdResult<bool> {
        if chunk_number >= self.total_chunks {
            return Err(JobdError::ChunkOutOfRange {
                chunk_number,
                total_chunks: self.total_chunks,
            });
        }
        Ok(self.received_chunk_numbers.insert(chunk_number))
    }

    pub fn chunks_received(&self) -> u32 {
        self.received_chunk_numbers.len() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.chunks_received() == self.total_chunks
    }
}
