//! 内存态存储实现
//!
//! 速率槽位与用量行是仅有的共享竞争状态，全部变更都是单次原子操作
//! （CAS循环或原子加），不同租户互不阻塞，没有横跨多行的粗粒度锁。

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use jobd_core::models::{UploadSession, UsageField, UsagePeriod};
use jobd_core::traits::{ChunkRecord, RateStore, UploadSessionRepository, UsageRepository};
use jobd_core::{JobdError, JobdResult};

/// 内存速率计数存储
///
/// 每个键一个原子槽位，(窗口编号, 计数) 打包进一个u64。放行是一次
/// CAS循环：新窗口将槽位重置为计数1，同窗口内计数未达上限时加一，
/// 会超限的请求直接失败且不递增，不存在读后写竞争。
#[derive(Debug, Default)]
pub struct InMemoryRateStore {
    slots: RwLock<HashMap<String, Arc<AtomicU64>>>,
}

fn pack(window: u32, count: u32) -> u64 {
    ((window as u64) << 32) | count as u64
}

fn unpack(value: u64) -> (u32, u32) {
    ((value >> 32) as u32, value as u32)
}

impl InMemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> JobdResult<Arc<AtomicU64>> {
        {
            let slots = self
                .slots
                .read()
                .map_err(|_| JobdError::Internal("速率槽位锁已损坏".to_string()))?;
            if let Some(slot) = slots.get(key) {
                return Ok(Arc::clone(slot));
            }
        }
        let mut slots = self
            .slots
            .write()
            .map_err(|_| JobdError::Internal("速率槽位锁已损坏".to_string()))?;
        Ok(Arc::clone(
            slots.entry(key.to_string()).or_default(),
        ))
    }
}

#[async_trait]
impl RateStore for InMemoryRateStore {
    async fn try_admit(&self, key: &str, window_id: i64, limit: u32) -> JobdResult<bool> {
        let slot = self.slot(key)?;
        let window = window_id as u32;
        loop {
            let current = slot.load(Ordering::SeqCst);
            let (slot_window, count) = unpack(current);
            let next = if slot_window != window {
                // 新窗口取代旧窗口，计数从1开始
                pack(window, 1)
            } else if count < limit {
                pack(window, count + 1)
            } else {
                return Ok(false);
            };
            if slot
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(true);
            }
        }
    }

    async fn count(&self, key: &str, window_id: i64) -> JobdResult<Option<u32>> {
        let slots = self
            .slots
            .read()
            .map_err(|_| JobdError::Internal("速率槽位锁已损坏".to_string()))?;
        Ok(slots.get(key).and_then(|slot| {
            let (slot_window, count) = unpack(slot.load(Ordering::SeqCst));
            (slot_window == window_id as u32 && count > 0).then_some(count)
        }))
    }
}

#[derive(Debug)]
struct UsageRow {
    emails_sent: AtomicI64,
    emails_received: AtomicI64,
    storage_bytes: AtomicI64,
    updated_at_secs: AtomicI64,
}

impl UsageRow {
    fn new() -> Self {
        Self {
            emails_sent: AtomicI64::new(0),
            emails_received: AtomicI64::new(0),
            storage_bytes: AtomicI64::new(0),
            updated_at_secs: AtomicI64::new(Utc::now().timestamp()),
        }
    }

    fn field(&self, field: UsageField) -> &AtomicI64 {
        match field {
            UsageField::EmailsSent => &self.emails_sent,
            UsageField::EmailsReceived => &self.emails_received,
            UsageField::StorageBytes => &self.storage_bytes,
        }
    }
}

/// 内存用量账本存储
///
/// 每个 (租户, 账期) 一行，行内各计数为独立原子量；增量在行内原子
/// 完成并钳制为非负，调用方永远看不到读-改-写窗口。
#[derive(Debug, Default)]
pub struct InMemoryUsageRepository {
    rows: RwLock<HashMap<(String, String), Arc<UsageRow>>>,
}

impl InMemoryUsageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn row(&self, tenant_id: &str, period_key: &str) -> JobdResult<Arc<UsageRow>> {
        let key = (tenant_id.to_string(), period_key.to_string());
        {
            let rows = self
                .rows
                .read()
                .map_err(|_| JobdError::Internal("用量行锁已损坏".to_string()))?;
            if let Some(row) = rows.get(&key) {
                return Ok(Arc::clone(row));
            }
        }
        let mut rows = self
            .rows
            .write()
            .map_err(|_| JobdError::Internal("用量行锁已损坏".to_string()))?;
        Ok(Arc::clone(
            rows.entry(key).or_insert_with(|| Arc::new(UsageRow::new())),
        ))
    }
}

#[async_trait]
impl UsageRepository for InMemoryUsageRepository {
    async fn increment(
        &self,
        tenant_id: &str,
        period_key: &str,
        field: UsageField,
        delta: i64,
    ) -> JobdResult<i64> {
        let row = self.row(tenant_id, period_key)?;
        let counter = row.field(field);
        let previous = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |value| {
                Some((value + delta).max(0))
            })
            .unwrap_or(0);
        row.updated_at_secs
            .store(Utc::now().timestamp(), Ordering::SeqCst);
        Ok((previous + delta).max(0))
    }

    async fn get(&self, tenant_id: &str, period_key: &str) -> JobdResult<Option<UsagePeriod>> {
        let rows = self
            .rows
            .read()
            .map_err(|_| JobdError::Internal("用量行锁已损坏".to_string()))?;
        let key = (tenant_id.to_string(), period_key.to_string());
        Ok(rows.get(&key).map(|row| UsagePeriod {
            tenant_id: tenant_id.to_string(),
            period_key: period_key.to_string(),
            emails_sent: row.emails_sent.load(Ordering::SeqCst),
            emails_received: row.emails_received.load(Ordering::SeqCst),
            storage_bytes: row.storage_bytes.load(Ordering::SeqCst),
            updated_at: DateTime::from_timestamp(row.updated_at_secs.load(Ordering::SeqCst), 0)
                .unwrap_or_else(Utc::now),
        }))
    }

    async fn reset_period(&self, period_key: &str) -> JobdResult<u64> {
        let rows = self
            .rows
            .read()
            .map_err(|_| JobdError::Internal("用量行锁已损坏".to_string()))?;
        let mut affected = 0u64;
        for ((_, period), row) in rows.iter() {
            if period == period_key {
                row.emails_sent.store(0, Ordering::SeqCst);
                row.emails_received.store(0, Ordering::SeqCst);
                row.storage_bytes.store(0, Ordering::SeqCst);
                row.updated_at_secs
                    .store(Utc::now().timestamp(), Ordering::SeqCst);
                affected += 1;
            }
        }
        Ok(affected)
    }
}

/// 内存上传会话存储
///
/// 每个会话一把独立的互斥锁，记录分块在锁内完成插入与完成性判断，
/// 因此并发提交最后一块时 `completed_now` 恰好产生一次。
#[derive(Debug, Default)]
pub struct InMemoryUploadSessionRepository {
    sessions: RwLock<HashMap<String, Arc<Mutex<UploadSession>>>>,
}

impl InMemoryUploadSessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, upload_id: &str) -> JobdResult<Option<Arc<Mutex<UploadSession>>>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| JobdError::Internal("会话锁已损坏".to_string()))?;
        Ok(sessions.get(upload_id).cloned())
    }
}

#[async_trait]
impl UploadSessionRepository for InMemoryUploadSessionRepository {
    async fn insert(&self, session: UploadSession) -> JobdResult<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| JobdError::Internal("会话锁已损坏".to_string()))?;
        if sessions.contains_key(&session.upload_id) {
            return Err(JobdError::Storage(format!(
                "上传会话已存在: {}",
                session.upload_id
            )));
        }
        sessions.insert(
            session.upload_id.clone(),
            Arc::new(Mutex::new(session)),
        );
        Ok(())
    }

    async fn get(&self, upload_id: &str) -> JobdResult<Option<UploadSession>> {
        match self.entry(upload_id)? {
            Some(entry) => {
                let session = entry
                    .lock()
                    .map_err(|_| JobdError::Internal("会话锁已损坏".to_string()))?;
                Ok(Some(session.clone()))
            }
            None => Ok(None),
        }
    }

    async fn record_chunk(&self, upload_id: &str, chunk_number: u32) -> JobdResult<ChunkRecord> {
        let entry = self
            .entry(upload_id)?
            .ok_or_else(|| JobdError::SessionNotFound {
                upload_id: upload_id.to_string(),
            })?;
        let mut session = entry
            .lock()
            .map_err(|_| JobdError::Internal("会话锁已损坏".to_string()))?;
        let newly_inserted = session.record_chunk(chunk_number)?;
        Ok(ChunkRecord {
            chunks_received: session.chunks_received(),
            total_chunks: session.total_chunks,
            completed_now: newly_inserted && session.is_complete(),
        })
    }

    async fn delete(&self, upload_id: &str) -> JobdResult<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| JobdError::Internal("会话锁已损坏".to_string()))?;
        sessions.remove(upload_id);
        Ok(())
    }

    async fn created_before(&self, cutoff: DateTime<Utc>) -> JobdResult<Vec<UploadSession>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| JobdError::Internal("会话锁已损坏".to_string()))?;
        let mut expired = Vec::new();
        for entry in sessions.values() {
            let session = entry
                .lock()
                .map_err(|_| JobdError::Internal("会话锁已损坏".to_string()))?;
            if session.created_at < cutoff && !session.is_complete() {
                expired.push(session.clone());
            }
        }
        Ok(expired)
    }
}
