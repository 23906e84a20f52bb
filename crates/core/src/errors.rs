use thiserror::Error;

/// 系统统一错误类型
#[derive(Debug, Error)]
pub enum JobdError {
    #[error("数据库错误: {0}")]
    Database(String),
    #[error("Redis错误: {0}")]
    Redis(String),
    #[error("任务未找到: {id}")]
    JobNotFound { id: String },
    #[error("上传会话未找到: {upload_id}")]
    SessionNotFound { upload_id: String },
    #[error("分块编号越界: {chunk_number} (总分块数: {total_chunks})")]
    ChunkOutOfRange { chunk_number: u32, total_chunks: u32 },
    #[error("租户未找到: {tenant_id}")]
    TenantNotFound { tenant_id: String },
    #[error("触发速率限制: {action}, {retry_after_seconds}秒后重试")]
    RateLimited {
        action: String,
        retry_after_seconds: u64,
    },
    #[error("超出配额: {field} 当前 {current}, 上限 {limit}")]
    QuotaExceeded {
        field: String,
        current: i64,
        limit: u64,
    },
    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },
    #[error("任务执行超时")]
    ExecutionTimeout,
    #[error("消息队列错误: {0}")]
    MessageQueue(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("无效的任务参数: {0}")]
    InvalidJobParams(String),
    #[error("存储错误: {0}")]
    Storage(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type JobdResult<T> = Result<T, JobdError>;

impl From<serde_json::Error> for JobdError {
    fn from(err: serde_json::Error) -> Self {
        JobdError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for JobdError {
    fn from(err: std::io::Error) -> Self {
        JobdError::Storage(err.to_string())
    }
}

impl JobdError {
    /// 判断错误是否为瞬时错误，瞬时错误的任务可以按退避策略重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            JobdError::Database(_)
                | JobdError::Redis(_)
                | JobdError::MessageQueue(_)
                | JobdError::Storage(_)
                | JobdError::Timeout(_)
                | JobdError::ExecutionTimeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(JobdError::Database("connection reset".to_string()).is_transient());
        assert!(JobdError::Timeout("dequeue".to_string()).is_transient());
        assert!(!JobdError::JobNotFound {
            id: "abc".to_string()
        }
        .is_transient());
        assert!(!JobdError::InvalidJobParams("missing field".to_string()).is_transient());
    }

    #[test]
    fn test_error_display_carries_context() {
        let err = JobdError::QuotaExceeded {
            field: "emails_sent".to_string(),
            current: 300,
            limit: 300,
        };
        let msg = err.to_string();
        assert!(msg.contains("emails_sent"));
        assert!(msg.contains("300"));
    }
}
