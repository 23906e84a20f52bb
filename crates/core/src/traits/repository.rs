use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::JobdResult;
use crate::models::{UploadSession, UsageField, UsagePeriod};

/// 用量账本存储接口
///
/// 所有变更都是存储侧的单条原子增量，调用方永远不做读-改-写，
/// 以保证并发任务对同一 (租户, 账期) 的增减不丢失更新。
#[async_trait]
pub trait UsageRepository: Send + Sync {
    /// 原子增量，行不存在时惰性创建；计数被钳制为非负；返回新值
    async fn increment(
        &self,
        tenant_id: &str,
        period_key: &str,
        field: UsageField,
        delta: i64,
    ) -> JobdResult<i64>;

    /// 读取账期用量
    async fn get(&self, tenant_id: &str, period_key: &str) -> JobdResult<Option<UsagePeriod>>;

    /// 将指定账期所有租户的计数清零（不删除行），返回受影响行数
    async fn reset_period(&self, period_key: &str) -> JobdResult<u64>;
}

/// 记录分块后的会话进度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRecord {
    pub chunks_received: u32,
    pub total_chunks: u32,
    /// 本次插入是否恰好使集合变满。并发提交竞争最后一块时，
    /// 只有一次调用会得到 true。
    pub completed_now: bool,
}

/// 上传会话存储接口
#[async_trait]
pub trait UploadSessionRepository: Send + Sync {
    /// 插入新会话，`upload_id` 唯一
    async fn insert(&self, session: UploadSession) -> JobdResult<()>;

    async fn get(&self, upload_id: &str) -> JobdResult<Option<UploadSession>>;

    /// 幂等记录一个分块编号
    ///
    /// 会话不存在返回 `SessionNotFound`；编号越界返回 `ChunkOutOfRange`。
    /// 同一会话上的记录操作彼此串行，保证 `completed_now` 恰好触发一次。
    async fn record_chunk(&self, upload_id: &str, chunk_number: u32) -> JobdResult<ChunkRecord>;

    async fn delete(&self, upload_id: &str) -> JobdResult<()>;

    /// 创建时间早于 `cutoff` 且未完成合并的会话（供TTL回收）
    async fn created_before(&self, cutoff: DateTime<Utc>) -> JobdResult<Vec<UploadSession>>;
}

/// 速率计数存储接口
///
/// 槽位按 (键, 窗口编号) 维护计数；`try_admit` 必须是单次比较并递增：
/// 新窗口将槽位重置为 1，同窗口内计数小于上限时加一并放行，会超限的
/// 请求直接拒绝且不递增。
#[async_trait]
pub trait RateStore: Send + Sync {
    async fn try_admit(&self, key: &str, window_id: i64, limit: u32) -> JobdResult<bool>;

    /// 指定窗口的当前计数（无记录时为 None）
    async fn count(&self, key: &str, window_id: i64) -> JobdResult<Option<u32>>;
}

/// 合并产物
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledFile {
    pub path: PathBuf,
    pub size_bytes: i64,
}

/// 分块字节存储接口
///
/// 原始分块在合并任务确认成功前一直保留，崩溃后重试无数据丢失。
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// 保存分块字节，重复保存同一编号为覆盖写
    async fn save_chunk(&self, upload_id: &str, chunk_number: u32, bytes: &[u8]) -> JobdResult<()>;

    /// 按分块编号升序拼接为最终文件
    async fn assemble(
        &self,
        upload_id: &str,
        total_chunks: u32,
        target_filename: &str,
    ) -> JobdResult<AssembledFile>;

    /// 查询已合并的最终文件（用于合并重放的幂等判断）
    async fn final_file(
        &self,
        upload_id: &str,
        target_filename: &str,
    ) -> JobdResult<Option<AssembledFile>>;

    /// 删除一次上传的全部分块
    async fn delete_chunks(&self, upload_id: &str) -> JobdResult<()>;
}
