use thiserror::Error;

use jobd_core::JobdError;

/// 提交接口的错误表面
///
/// 外部REST层直接消费：拒绝原因机器可读，限速拒绝附带重试提示。
/// 速率与配额拒绝在提交时同步返回，对应的任务不会入队。
#[derive(Debug, Error)]
pub enum SubmitError {
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
    #[error("请求无效: {0}")]
    Invalid(String),
    #[error("资源不存在: {0}")]
    NotFound(String),
    #[error("内部错误: {0}")]
    Internal(JobdError),
}

impl SubmitError {
    /// 机器可读的拒绝原因码
    pub fn reason(&self) -> &'static str {
        match self {
            SubmitError::RateLimited { .. } => "rate_limited",
            SubmitError::QuotaExceeded { .. } => "quota_exceeded",
            SubmitError::Invalid(_) => "invalid_request",
            SubmitError::NotFound(_) => "not_found",
            SubmitError::Internal(_) => "internal_error",
        }
    }

    /// 限速拒绝的重试提示（秒）
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            SubmitError::RateLimited {
                retry_after_seconds,
                ..
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }
}

impl From<JobdError> for SubmitError {
    fn from(err: JobdError) -> Self {
        match err {
            JobdError::RateLimited {
                action,
                retry_after_seconds,
            } => SubmitError::RateLimited {
                action,
                retry_after_seconds,
            },
            JobdError::QuotaExceeded {
                field,
                current,
                limit,
            } => SubmitError::QuotaExceeded {
                field,
                current,
                limit,
            },
            JobdError::SessionNotFound { upload_id } => {
                SubmitError::NotFound(format!("上传会话不存在: {upload_id}"))
            }
            JobdError::TenantNotFound { tenant_id } => {
                SubmitError::NotFound(format!("租户不存在: {tenant_id}"))
            }
            err @ (JobdError::ChunkOutOfRange { .. } | JobdError::InvalidJobParams(_)) => {
                SubmitError::Invalid(err.to_string())
            }
            other => SubmitError::Internal(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        let err = SubmitError::RateLimited {
            action: "email".to_string(),
            retry_after_seconds: 42,
        };
        assert_eq!(err.reason(), "rate_limited");
        assert_eq!(err.retry_after_seconds(), Some(42));

        let err = SubmitError::QuotaExceeded {
            field: "emails_sent".to_string(),
            current: 300,
            limit: 300,
        };
        assert_eq!(err.reason(), "quota_exceeded");
        assert_eq!(err.retry_after_seconds(), None);
    }

    #[test]
    fn test_session_not_found_maps_to_not_found() {
        let err: SubmitError = JobdError::SessionNotFound {
            upload_id: "u-1".to_string(),
        }
        .into();
        assert_eq!(err.reason(), "not_found");
    }
}
