//! 外部协作方接口
//!
//! 本核心之外的子系统（ORM持久层、SMTP网关、病毒扫描引擎、套餐表）
//! 以这些接口的形式被消费。进程装配时注入具体实现，测试注入内存伪实现。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::JobdResult;
use crate::models::PlanTier;

/// 套餐查询（纯函数：租户 → 套餐）
#[async_trait]
pub trait PlanProvider: Send + Sync {
    async fn plan_for(&self, tenant_id: &str) -> JobdResult<PlanTier>;
}

/// 邮件投递状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EmailStatus {
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "SENT")]
    Sent,
    #[serde(rename = "FAILED")]
    Failed,
}

/// 待发送邮件记录
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub email_id: i64,
    pub tenant_id: String,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub body_text: String,
}

/// 邮件记录存储（外部持久层）
///
/// 邮件记录的投递状态是发送处理器的幂等依据。
#[async_trait]
pub trait MailStore: Send + Sync {
    async fn get(&self, email_id: i64) -> JobdResult<Option<OutboundEmail>>;
    async fn status(&self, email_id: i64) -> JobdResult<Option<EmailStatus>>;
    async fn mark_sent(&self, email_id: i64) -> JobdResult<()>;
    async fn mark_failed(&self, email_id: i64) -> JobdResult<()>;
}

/// 邮件发送通道（外部SMTP网关）
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> JobdResult<()>;
}

/// 病毒扫描结论
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScanVerdict {
    #[serde(rename = "CLEAN")]
    Clean,
    #[serde(rename = "INFECTED")]
    Infected,
    #[serde(rename = "SCAN_FAILED")]
    ScanFailed,
}

/// 文件记录
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub file_id: i64,
    pub tenant_id: String,
    pub path: PathBuf,
    pub size_bytes: i64,
}

/// 文件记录存储（外部持久层）
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn get(&self, file_id: i64) -> JobdResult<Option<StoredFile>>;
    async fn set_scan_status(&self, file_id: i64, verdict: ScanVerdict) -> JobdResult<()>;
    /// 登记合并完成的最终文件，返回文件ID
    async fn register_file(
        &self,
        tenant_id: &str,
        path: &Path,
        size_bytes: i64,
    ) -> JobdResult<i64>;
}

/// 病毒扫描引擎（检测逻辑在本核心之外，这里只负责调度）
#[async_trait]
pub trait VirusScanner: Send + Sync {
    async fn scan(&self, path: &Path) -> JobdResult<ScanVerdict>;
}

/// 过期数据清理（令牌、分享链接等外部实体）
#[async_trait]
pub trait ExpiryStore: Send + Sync {
    /// 清除 `now` 之前过期的记录，返回清除数量
    async fn purge_expired(&self, now: DateTime<Utc>) -> JobdResult<u64>;
}
