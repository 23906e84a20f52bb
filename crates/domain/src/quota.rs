use std::sync::Arc;

use tracing::{info, warn};

use jobd_core::models::{Limit, UsageField, UsagePeriod};
use jobd_core::traits::UsageRepository;
use jobd_core::JobdResult;

/// 用量账本
///
/// 对外提供两类操作：准入检查用的读取（peek）与成功后的入账（commit）。
/// 入账是存储侧的原子增量；下游任务失败后由补偿性反向入账（credit）
/// 恢复，避免账本漂移。月度重置只清零不删行，跨账期保留审计历史。
pub struct QuotaLedger {
    repo: Arc<dyn UsageRepository>,
}

impl QuotaLedger {
    pub fn new(repo: Arc<dyn UsageRepository>) -> Self {
        Self { repo }
    }

    /// 计数型限额的准入检查：当前计数下是否还允许再发生一次
    pub async fn check_count_limit(
        &self,
        tenant_id: &str,
        period_key: &str,
        field: UsageField,
        limit: Limit,
    ) -> JobdResult<bool> {
        let current = self.current(tenant_id, period_key, field).await?;
        Ok(limit.allows_another(current.max(0) as u64))
    }

    /// 容量型限额的准入检查：加上增量后的总量是否仍在限额内
    pub async fn check_capacity_limit(
        &self,
        tenant_id: &str,
        period_key: &str,
        field: UsageField,
        limit: Limit,
        additional: u64,
    ) -> JobdResult<bool> {
        let current = self.current(tenant_id, period_key, field).await?;
        let projected = (current.max(0) as u64).saturating_add(additional);
        Ok(limit.contains(projected))
    }

    /// 入账（副作用确认成功后调用），返回新计数
    pub async fn debit(
        &self,
        tenant_id: &str,
        period_key: &str,
        field: UsageField,
        delta: i64,
    ) -> JobdResult<i64> {
        let total = self
            .repo
            .increment(tenant_id, period_key, field, delta)
            .await?;
        info!(
            tenant_id = tenant_id,
            period_key = period_key,
            field = %field,
            delta = delta,
            total = total,
            "usage debited"
        );
        Ok(total)
    }

    /// 补偿性反向入账（如已入账的存储在文件删除后退还），钳制为非负
    pub async fn credit(
        &self,
        tenant_id: &str,
        period_key: &str,
        field: UsageField,
        delta: i64,
    ) -> JobdResult<i64> {
        let total = self
            .repo
            .increment(tenant_id, period_key, field, -delta)
            .await?;
        if total == 0 && delta > 0 {
            warn!(
                tenant_id = tenant_id,
                period_key = period_key,
                field = %field,
                "usage credit clamped at zero"
            );
        }
        Ok(total)
    }

    /// 读取账期用量，无记录时返回零值账期
    pub async fn read(&self, tenant_id: &str, period_key: &str) -> JobdResult<UsagePeriod> {
        Ok(self
            .repo
            .get(tenant_id, period_key)
            .await?
            .unwrap_or_else(|| {
                UsagePeriod::new(tenant_id.to_string(), period_key.to_string())
            }))
    }

    /// 清零指定账期的所有计数（不删除行），返回受影响行数
    pub async fn reset_period(&self, period_key: &str) -> JobdResult<u64> {
        let rows = self.repo.reset_period(period_key).await?;
        info!(period_key = period_key, rows = rows, "monthly usage reset");
        Ok(rows)
    }

    async fn current(
        &self,
        tenant_id: &str,
        period_key: &str,
        field: UsageField,
    ) -> JobdResult<i64> {
        Ok(self
            .repo
            .get(tenant_id, period_key)
            .await?
            .map(|usage| usage.get(field))
            .unwrap_or(0))
    }
}
