use serde::{Deserialize, Serialize};

/// 订阅套餐
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PlanTier {
    #[serde(rename = "FREE")]
    Free,
    #[serde(rename = "PRO")]
    Pro,
    #[serde(rename = "ENTERPRISE")]
    Enterprise,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "FREE",
            PlanTier::Pro => "PRO",
            PlanTier::Enterprise => "ENTERPRISE",
        }
    }
}

/// 带标签的限额值
///
/// 用显式变体替代"unlimited"哨兵值，比较逻辑按变体定义，不依赖类型转换。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Limit {
    Bounded(u64),
    Unbounded,
}

impl Limit {
    /// 当前计数下是否还允许再发生一次（用于按次计数的限额，如月度邮件数）
    pub fn allows_another(&self, current: u64) -> bool {
        match self {
            Limit::Unbounded => true,
            Limit::Bounded(max) => current < *max,
        }
    }

    /// 总量是否在限额内（用于容量型限额，如存储字节数）
    pub fn contains(&self, total: u64) -> bool {
        match self {
            Limit::Unbounded => true,
            Limit::Bounded(max) => total <= *max,
        }
    }

    pub fn bound(&self) -> Option<u64> {
        match self {
            Limit::Unbounded => None,
            Limit::Bounded(max) => Some(*max),
        }
    }
}

/// 套餐限额表
///
/// 套餐到限额的映射是纯函数，套餐查询本身由外部层提供（`PlanProvider`）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanLimits {
    pub max_emails_per_month: Limit,
    pub max_emails_per_minute: u32,
    pub storage_limit_bytes: Limit,
    pub max_upload_size_bytes: Limit,
}

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

impl PlanLimits {
    pub fn for_tier(tier: PlanTier) -> Self {
        match tier {
            PlanTier::Free => Self {
                max_emails_per_month: Limit::Bounded(300),
                max_emails_per_minute: 5,
                storage_limit_bytes: Limit::Bounded(5 * GIB),
                max_upload_size_bytes: Limit::Bounded(50 * MIB),
            },
            PlanTier::Pro => Self {
                max_emails_per_month: Limit::Bounded(500),
                max_emails_per_minute: 20,
                storage_limit_bytes: Limit::Bounded(50 * GIB),
                max_upload_size_bytes: Limit::Bounded(2 * GIB),
            },
            PlanTier::Enterprise => Self {
                max_emails_per_month: Limit::Unbounded,
                max_emails_per_minute: 100,
                storage_limit_bytes: Limit::Unbounded,
                max_upload_size_bytes: Limit::Unbounded,
            },
        }
    }
}
