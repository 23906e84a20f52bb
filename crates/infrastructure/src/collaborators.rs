//! 外部协作方的嵌入式实现
//!
//! 供嵌入式运行模式与测试使用：邮件与文件记录落在内存，发送通道只
//! 记日志，扫描引擎用扩展名启发式占位。生产部署将这些接口接到真实
//! 的持久层、SMTP网关与扫描服务。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use jobd_core::models::PlanTier;
use jobd_core::traits::{
    EmailStatus, EmailTransport, ExpiryStore, FileStore, MailStore, OutboundEmail, PlanProvider,
    ScanVerdict, StoredFile, VirusScanner,
};
use jobd_core::{JobdError, JobdResult};

/// 静态套餐表
///
/// 未显式登记的租户归入默认套餐。
pub struct StaticPlanProvider {
    default_tier: PlanTier,
    tenants: RwLock<HashMap<String, PlanTier>>,
}

impl StaticPlanProvider {
    pub fn new(default_tier: PlanTier) -> Self {
        Self {
            default_tier,
            tenants: RwLock::new(HashMap::new()),
        }
    }

    pub async fn set_plan(&self, tenant_id: &str, tier: PlanTier) {
        self.tenants
            .write()
            .await
            .insert(tenant_id.to_string(), tier);
    }
}

#[async_trait]
impl PlanProvider for StaticPlanProvider {
    async fn plan_for(&self, tenant_id: &str) -> JobdResult<PlanTier> {
        Ok(self
            .tenants
            .read()
            .await
            .get(tenant_id)
            .copied()
            .unwrap_or(self.default_tier))
    }
}

/// 内存邮件记录存储
#[derive(Default)]
pub struct InMemoryMailStore {
    emails: RwLock<HashMap<i64, (OutboundEmail, EmailStatus)>>,
}

impl InMemoryMailStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, email: OutboundEmail) {
        self.emails
            .write()
            .await
            .insert(email.email_id, (email, EmailStatus::Queued));
    }
}

#[async_trait]
impl MailStore for InMemoryMailStore {
    async fn get(&self, email_id: i64) -> JobdResult<Option<OutboundEmail>> {
        Ok(self
            .emails
            .read()
            .await
            .get(&email_id)
            .map(|(email, _)| email.clone()))
    }

    async fn status(&self, email_id: i64) -> JobdResult<Option<EmailStatus>> {
        Ok(self
            .emails
            .read()
            .await
            .get(&email_id)
            .map(|(_, status)| *status))
    }

    async fn mark_sent(&self, email_id: i64) -> JobdResult<()> {
        let mut emails = self.emails.write().await;
        match emails.get_mut(&email_id) {
            Some((_, status)) => {
                *status = EmailStatus::Sent;
                Ok(())
            }
            None => Err(JobdError::Internal(format!("邮件记录不存在: {email_id}"))),
        }
    }

    async fn mark_failed(&self, email_id: i64) -> JobdResult<()> {
        let mut emails = self.emails.write().await;
        match emails.get_mut(&email_id) {
            Some((_, status)) => {
                *status = EmailStatus::Failed;
                Ok(())
            }
            None => Err(JobdError::Internal(format!("邮件记录不存在: {email_id}"))),
        }
    }
}

/// 只记日志的发送通道
#[derive(Default)]
pub struct LoggingEmailTransport {
    sent: AtomicI64,
}

impl LoggingEmailTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_count(&self) -> i64 {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailTransport for LoggingEmailTransport {
    async fn send(&self, email: &OutboundEmail) -> JobdResult<()> {
        info!(
            email_id = email.email_id,
            recipient = %email.recipient,
            subject = %email.subject,
            "email dispatched (logging transport)"
        );
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 内存文件记录存储
#[derive(Default)]
pub struct InMemoryFileStore {
    files: RwLock<HashMap<i64, StoredFile>>,
    verdicts: RwLock<HashMap<i64, ScanVerdict>>,
    next_id: AtomicI64,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            verdicts: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub async fn insert(&self, file: StoredFile) {
        self.files.write().await.insert(file.file_id, file);
    }

    pub async fn registered(&self) -> Vec<StoredFile> {
        self.files.read().await.values().cloned().collect()
    }

    pub async fn scan_status(&self, file_id: i64) -> Option<ScanVerdict> {
        self.verdicts.read().await.get(&file_id).copied()
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn get(&self, file_id: i64) -> JobdResult<Option<StoredFile>> {
        Ok(self.files.read().await.get(&file_id).cloned())
    }

    async fn set_scan_status(&self, file_id: i64, verdict: ScanVerdict) -> JobdResult<()> {
        self.verdicts.write().await.insert(file_id, verdict);
        Ok(())
    }

    async fn register_file(
        &self,
        tenant_id: &str,
        path: &Path,
        size_bytes: i64,
    ) -> JobdResult<i64> {
        let mut files = self.files.write().await;
        // 以路径为键幂等登记，合并任务重放不会产生重复记录
        if let Some(existing) = files.values().find(|f| f.path == path) {
            return Ok(existing.file_id);
        }
        let file_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        files.insert(
            file_id,
            StoredFile {
                file_id,
                tenant_id: tenant_id.to_string(),
                path: PathBuf::from(path),
                size_bytes,
            },
        );
        Ok(file_id)
    }
}

/// 扩展名启发式扫描（占位实现）
///
/// 可疑扩展名加超大体积判为感染；真实部署接入专门的扫描服务。
#[derive(Default)]
pub struct ExtensionHeuristicScanner;

const SUSPICIOUS_EXTENSIONS: &[&str] = &["exe", "bat", "cmd", "scr", "pif", "com"];
const SUSPICIOUS_SIZE_BYTES: u64 = 10 * 1024 * 1024;

impl ExtensionHeuristicScanner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VirusScanner for ExtensionHeuristicScanner {
    async fn scan(&self, path: &Path) -> JobdResult<ScanVerdict> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "scan target unreadable");
                return Ok(ScanVerdict::ScanFailed);
            }
        };
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        let suspicious = extension
            .as_deref()
            .is_some_and(|ext| SUSPICIOUS_EXTENSIONS.contains(&ext));
        if suspicious && metadata.len() > SUSPICIOUS_SIZE_BYTES {
            return Ok(ScanVerdict::Infected);
        }
        Ok(ScanVerdict::Clean)
    }
}

/// 内存过期记录存储（令牌、分享链接的测试替身）
#[derive(Default)]
pub struct InMemoryExpiryStore {
    expirations: RwLock<Vec<DateTime<Utc>>>,
}

impl InMemoryExpiryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, expires_at: DateTime<Utc>) {
        self.expirations.write().await.push(expires_at);
    }

    pub async fn remaining(&self) -> usize {
        self.expirations.read().await.len()
    }
}

#[async_trait]
impl ExpiryStore for InMemoryExpiryStore {
    async fn purge_expired(&self, now: DateTime<Utc>) -> JobdResult<u64> {
        let mut expirations = self.expirations.write().await;
        let before = expirations.len();
        expirations.retain(|expires_at| *expires_at >= now);
        Ok((before - expirations.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plan_provider_falls_back_to_default() {
        let plans = StaticPlanProvider::new(PlanTier::Free);
        plans.set_plan("t-pro", PlanTier::Pro).await;
        assert_eq!(plans.plan_for("t-pro").await.unwrap(), PlanTier::Pro);
        assert_eq!(plans.plan_for("t-unknown").await.unwrap(), PlanTier::Free);
    }

    #[tokio::test]
    async fn test_mail_store_status_transitions() {
        let store = InMemoryMailStore::new();
        store
            .insert(OutboundEmail {
                email_id: 1,
                tenant_id: "t-1".to_string(),
                sender: "a@x.com".to_string(),
                recipient: "b@y.com".to_string(),
                subject: "hi".to_string(),
                body_text: "hello".to_string(),
            })
            .await;
        assert_eq!(store.status(1).await.unwrap(), Some(EmailStatus::Queued));
        store.mark_sent(1).await.unwrap();
        assert_eq!(store.status(1).await.unwrap(), Some(EmailStatus::Sent));
        assert!(store.mark_sent(99).await.is_err());
    }

    #[tokio::test]
    async fn test_file_registration_is_idempotent_by_path() {
        let store = InMemoryFileStore::new();
        let path = Path::new("/data/files/u-1_a.bin");
        let id1 = store.register_file("t-1", path, 10).await.unwrap();
        let id2 = store.register_file("t-1", path, 10).await.unwrap();
        assert_eq!(id1, id2);
        assert_eq!(store.registered().await.len(), 1);
    }

    #[tokio::test]
    async fn test_scanner_flags_large_suspicious_files() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = ExtensionHeuristicScanner::new();

        let clean = dir.path().join("notes.txt");
        tokio::fs::write(&clean, b"text").await.unwrap();
        assert_eq!(scanner.scan(&clean).await.unwrap(), ScanVerdict::Clean);

        // 可疑扩展但体积小，按启发式放行
        let small_exe = dir.path().join("tool.exe");
        tokio::fs::write(&small_exe, b"MZ").await.unwrap();
        assert_eq!(scanner.scan(&small_exe).await.unwrap(), ScanVerdict::Clean);

        let missing = dir.path().join("gone.bin");
        assert_eq!(
            scanner.scan(&missing).await.unwrap(),
            ScanVerdict::ScanFailed
        );
    }

    #[tokio::test]
    async fn test_expiry_store_purges_only_expired() {
        let store = InMemoryExpiryStore::new();
        let now = Utc::now();
        store.insert(now - chrono::Duration::hours(1)).await;
        store.insert(now + chrono::Duration::hours(1)).await;
        let purged = store.purge_expired(now).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.remaining().await, 1);
    }
}
