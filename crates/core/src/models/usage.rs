use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 租户账期用量
///
/// 每个 (租户, 账期) 唯一，计数非负。首次使用时惰性创建，由任务结果
/// 增减，月度重置任务将其清零但从不删除，以保留审计历史。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsagePeriod {
    pub tenant_id: String,
    pub period_key: String,
    pub emails_sent: i64,
    pub emails_received: i64,
    pub storage_bytes: i64,
    pub updated_at: DateTime<Utc>,
}

impl UsagePeriod {
    pub fn new(tenant_id: String, period_key: String) -> Self {
        Self {
            tenant_id,
            period_key,
            emails_sent: 0,
            emails_received: 0,
            storage_bytes: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn get(&self, field: UsageField) -> i64 {
        match field {
            UsageField::EmailsSent => self.emails_sent,
            UsageField::EmailsReceived => self.emails_received,
            UsageField::StorageBytes => self.storage_bytes,
        }
    }

    /// 当前时间对应的账期键，如 "2024-01"
    pub fn current_period_key() -> String {
        Self::period_key_for(Utc::now())
    }

    pub fn period_key_for(at: DateTime<Utc>) -> String {
        at.format("%Y-%m").to_string()
    }
}

/// 用量字段
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum UsageField {
    #[serde(rename = "emails_sent")]
    EmailsSent,
    #[serde(rename = "emails_received")]
    EmailsReceived,
    #[serde(rename = "storage_bytes")]
    StorageBytes,
}

impl UsageField {
    /// 字段名，同时用作存储列名和指标标签
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageField::EmailsSent => "emails_sent",
            UsageField::EmailsReceived => "emails_received",
            UsageField::StorageBytes => "storage_bytes",
        }
    }
}

impl std::fmt::Display for UsageField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_key_format() {
        let at = DateTime::from_timestamp(1_704_067_200, 0).unwrap(); // 2024-01-01T00:00:00Z
        assert_eq!(UsagePeriod::period_key_for(at), "2024-01");
    }

    #[test]
    fn test_field_access() {
        let mut usage = UsagePeriod::new("t-1".to_string(), "2024-01".to_string());
        usage.emails_sent = 7;
        usage.storage_bytes = 1024;
        assert_eq!(usage.get(UsageField::EmailsSent), 7);
        assert_eq!(usage.get(UsageField::EmailsReceived), 0);
        assert_eq!(usage.get(UsageField::StorageBytes), 1024);
    }
}
