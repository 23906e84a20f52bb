use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use jobd_core::models::UploadSession;
use jobd_core::traits::{ChunkRecord, UploadSessionRepository};
use jobd_core::{JobdError, JobdResult};

use crate::database::db_err;

/// Postgres上传会话存储
///
/// `upload_id` 上有唯一约束；记录分块在行锁事务内完成，并发提交
/// 最后一块时只有一个事务观察到集合从不满变满。
pub struct PostgresUploadSessionRepository {
    pool: PgPool,
}

impl PostgresUploadSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_session(row: &sqlx::postgres::PgRow) -> JobdResult<UploadSession> {
        let received: Vec<i32> = row.try_get("received_chunks").map_err(db_err)?;
        let total_chunks: i32 = row.try_get("total_chunks").map_err(db_err)?;
        Ok(UploadSession {
            upload_id: row.try_get("upload_id").map_err(db_err)?,
            tenant_id: row.try_get("tenant_id").map_err(db_err)?,
            total_chunks: total_chunks as u32,
            received_chunk_numbers: received.into_iter().map(|n| n as u32).collect::<BTreeSet<_>>(),
            target_filename: row.try_get("target_filename").map_err(db_err)?,
            mime_type: row.try_get("mime_type").map_err(db_err)?,
            folder_id: row.try_get("folder_id").map_err(db_err)?,
            created_at: row.try_get("created_at").map_err(db_err)?,
        })
    }
}

#[async_trait]
impl UploadSessionRepository for PostgresUploadSessionRepository {
    #[instrument(skip(self, session), fields(upload_id = %session.upload_id))]
    async fn insert(&self, session: UploadSession) -> JobdResult<()> {
        let received: Vec<i32> = session
            .received_chunk_numbers
            .iter()
            .map(|n| *n as i32)
            .collect();
        sqlx::query(
            "INSERT INTO upload_sessions \
             (upload_id, tenant_id, total_chunks, received_chunks, target_filename, mime_type, folder_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&session.upload_id)
        .bind(&session.tenant_id)
        .bind(session.total_chunks as i32)
        .bind(&received)
        .bind(&session.target_filename)
        .bind(&session.mime_type)
        .bind(session.folder_id)
        .bind(session.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => JobdError::Storage(format!(
                "上传会话已存在: {}",
                session.upload_id
            )),
            _ => db_err(e),
        })?;
        Ok(())
    }

    async fn get(&self, upload_id: &str) -> JobdResult<Option<UploadSession>> {
        let row = sqlx::query(
            "SELECT upload_id, tenant_id, total_chunks, received_chunks, target_filename, mime_type, folder_id, created_at \
             FROM upload_sessions WHERE upload_id = $1",
        )
        .bind(upload_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|row| Self::row_to_session(&row)).transpose()
    }

    #[instrument(skip(self))]
    async fn record_chunk(&self, upload_id: &str, chunk_number: u32) -> JobdResult<ChunkRecord> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query(
            "SELECT total_chunks, received_chunks FROM upload_sessions \
             WHERE upload_id = $1 FOR UPDATE",
        )
        .bind(upload_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| JobdError::SessionNotFound {
            upload_id: upload_id.to_string(),
        })?;

        let total_chunks: i32 = row.try_get("total_chunks").map_err(db_err)?;
        let received: Vec<i32> = row.try_get("received_chunks").map_err(db_err)?;

        if chunk_number as i32 >= total_chunks {
            return Err(JobdError::ChunkOutOfRange {
                chunk_number,
                total_chunks: total_chunks as u32,
            });
        }

        let newly_inserted = !received.contains(&(chunk_number as i32));
        if newly_inserted {
            sqlx::query(
                "UPDATE upload_sessions SET received_chunks = array_append(received_chunks, $2) \
                 WHERE upload_id = $1",
            )
            .bind(upload_id)
            .bind(chunk_number as i32)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;

        let chunks_received = received.len() as u32 + u32::from(newly_inserted);
        Ok(ChunkRecord {
            chunks_received,
            total_chunks: total_chunks as u32,
            completed_now: newly_inserted && chunks_received == total_chunks as u32,
        })
    }

    async fn delete(&self, upload_id: &str) -> JobdResult<()> {
        sqlx::query("DELETE FROM upload_sessions WHERE upload_id = $1")
            .bind(upload_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn created_before(&self, cutoff: DateTime<Utc>) -> JobdResult<Vec<UploadSession>> {
        let rows = sqlx::query(
            "SELECT upload_id, tenant_id, total_chunks, received_chunks, target_filename, mime_type, folder_id, created_at \
             FROM upload_sessions \
             WHERE created_at < $1 AND cardinality(received_chunks) < total_chunks",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(Self::row_to_session).collect()
    }
}
