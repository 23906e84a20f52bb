use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use jobd_core::models::{UsageField, UsagePeriod};
use jobd_core::traits::UsageRepository;
use jobd_core::JobdResult;

use crate::database::db_err;

/// Postgres用量账本存储
///
/// 增量是单条 upsert 语句：行不存在时按增量插入，存在时在数据库内
/// 原子累加并用 GREATEST 钳制为非负，多个Worker进程并发入账不丢失
/// 更新。账期行只清零不删除。
pub struct PostgresUsageRepository {
    pool: PgPool,
}

impl PostgresUsageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageRepository for PostgresUsageRepository {
    #[instrument(skip(self), fields(tenant_id = %tenant_id, period_key = %period_key))]
    async fn increment(
        &self,
        tenant_id: &str,
        period_key: &str,
        field: UsageField,
        delta: i64,
    ) -> JobdResult<i64> {
        // 列名取自枚举，不接受外部输入
        let column = field.as_str();
        let sql = format!(
            "INSERT INTO usage_periods (tenant_id, period_key, {column}, updated_at) \
             VALUES ($1, $2, GREATEST($3, 0), NOW()) \
             ON CONFLICT (tenant_id, period_key) \
             DO UPDATE SET {column} = GREATEST(usage_periods.{column} + $3, 0), updated_at = NOW() \
             RETURNING {column}"
        );
        let row = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(period_key)
            .bind(delta)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        row.try_get::<i64, _>(0).map_err(db_err)
    }

    async fn get(&self, tenant_id: &str, period_key: &str) -> JobdResult<Option<UsagePeriod>> {
        let row = sqlx::query(
            "SELECT tenant_id, period_key, emails_sent, emails_received, storage_bytes, updated_at \
             FROM usage_periods WHERE tenant_id = $1 AND period_key = $2",
        )
        .bind(tenant_id)
        .bind(period_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|row| {
            Ok(UsagePeriod {
                tenant_id: row.try_get("tenant_id").map_err(db_err)?,
                period_key: row.try_get("period_key").map_err(db_err)?,
                emails_sent: row.try_get("emails_sent").map_err(db_err)?,
                emails_received: row.try_get("emails_received").map_err(db_err)?,
                storage_bytes: row.try_get("storage_bytes").map_err(db_err)?,
                updated_at: row.try_get("updated_at").map_err(db_err)?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self))]
    async fn reset_period(&self, period_key: &str) -> JobdResult<u64> {
        let result = sqlx::query(
            "UPDATE usage_periods \
             SET emails_sent = 0, emails_received = 0, storage_bytes = 0, updated_at = NOW() \
             WHERE period_key = $1",
        )
        .bind(period_key)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}
