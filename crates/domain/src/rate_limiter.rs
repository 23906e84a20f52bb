use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use jobd_core::models::RateWindow;
use jobd_core::traits::RateStore;
use jobd_core::JobdResult;

/// 固定窗口速率限制器
///
/// 当前窗口由 `floor(now / window_seconds)` 标识。新窗口内的首次放行
/// 将槽位重置为计数1；同窗口内的放行是存储侧的单次比较并递增，结果
/// 不超过上限时放行，会超限的请求被拒绝且不递增计数。
///
/// 固定窗口在窗口边界允许最多2倍突发（上一窗口末尾加下一窗口开头各一轮），
/// 这是已确认接受的近似，不是滑动日志算法。计数可能随进程重启丢失，
/// 重启后的短暂宽松不构成正确性问题。
pub struct RateLimiter {
    store: Arc<dyn RateStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateStore>) -> Self {
        Self { store }
    }

    /// 申请放行一次动作
    pub async fn admit(
        &self,
        tenant_id: &str,
        action: &str,
        limit_per_window: u32,
        window_seconds: u64,
    ) -> JobdResult<bool> {
        self.admit_at(Utc::now(), tenant_id, action, limit_per_window, window_seconds)
            .await
    }

    /// 在指定时间点申请放行（供测试控制时钟）
    pub async fn admit_at(
        &self,
        now: DateTime<Utc>,
        tenant_id: &str,
        action: &str,
        limit_per_window: u32,
        window_seconds: u64,
    ) -> JobdResult<bool> {
        if limit_per_window == 0 {
            return Ok(false);
        }
        let window_id = RateWindow::window_id(now, window_seconds);
        let key = Self::key(tenant_id, action);
        let admitted = self.store.try_admit(&key, window_id, limit_per_window).await?;
        if !admitted {
            debug!(
                tenant_id = tenant_id,
                action = action,
                limit = limit_per_window,
                "rate limit window exhausted"
            );
        }
        Ok(admitted)
    }

    /// 当前窗口快照
    pub async fn window_at(
        &self,
        now: DateTime<Utc>,
        tenant_id: &str,
        action: &str,
        window_seconds: u64,
    ) -> JobdResult<Option<RateWindow>> {
        let window_id = RateWindow::window_id(now, window_seconds);
        let key = Self::key(tenant_id, action);
        let count = self.store.count(&key, window_id).await?;
        Ok(count.map(|count| RateWindow {
            tenant_id: tenant_id.to_string(),
            action: action.to_string(),
            window_start: RateWindow::window_start_for(window_id, window_seconds),
            count,
        }))
    }

    /// 距当前窗口结束的秒数，用作拒绝响应中的重试提示
    pub fn retry_after_seconds(now: DateTime<Utc>, window_seconds: u64) -> u64 {
        let window = window_seconds as i64;
        let elapsed = now.timestamp().rem_euclid(window);
        (window - elapsed) as u64
    }

    fn key(tenant_id: &str, action: &str) -> String {
        format!("{tenant_id}:{action}")
    }
}
