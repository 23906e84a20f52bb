use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 速率窗口快照
///
/// 每个 (租户, 动作) 在任意时刻只有一个活跃窗口；窗口到期后由新窗口取代，
/// 不在原记录上滚动。实际计数保存在 `RateStore` 的原子槽位中，本类型是
/// 读取时构造的快照。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateWindow {
    pub tenant_id: String,
    pub action: String,
    pub window_start: DateTime<Utc>,
    pub count: u32,
}

impl RateWindow {
    /// 计算时间点所属的窗口编号
    pub fn window_id(now: DateTime<Utc>, window_seconds: u64) -> i64 {
        now.timestamp().div_euclid(window_seconds as i64)
    }

    /// 窗口编号对应的起始时间
    pub fn window_start_for(window_id: i64, window_seconds: u64) -> DateTime<Utc> {
        DateTime::from_timestamp(window_id * window_seconds as i64, 0)
            .unwrap_or_else(|| DateTime::<Utc>::MIN_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_id_is_stable_within_window() {
        let t0 = DateTime::from_timestamp(1_700_000_040, 0).unwrap();
        let t1 = DateTime::from_timestamp(1_700_000_059, 0).unwrap();
        let t2 = DateTime::from_timestamp(1_700_000_060, 0).unwrap();
        assert_eq!(
            RateWindow::window_id(t0, 60),
            RateWindow::window_id(t1, 60)
        );
        assert_eq!(
            RateWindow::window_id(t1, 60) + 1,
            RateWindow::window_id(t2, 60)
        );
    }

    #[test]
    fn test_window_start_round_trip() {
        let now = DateTime::from_timestamp(1_700_000_123, 0).unwrap();
        let id = RateWindow::window_id(now, 60);
        let start = RateWindow::window_start_for(id, 60);
        assert!(start <= now);
        assert!(now - start < chrono::Duration::seconds(60));
        assert_eq!(start.timestamp() % 60, 0);
    }
}
