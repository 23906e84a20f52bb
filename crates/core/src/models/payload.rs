use serde::{Deserialize, Serialize};

use crate::errors::JobdResult;

use super::{Job, JobKind};

/// 发送邮件任务载荷
///
/// `email_id` 指向外部持久层中的邮件记录，处理器以该记录的投递状态作为
/// 幂等判断依据（已发送的记录不会重复发送）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendEmailPayload {
    pub tenant_id: String,
    pub email_id: i64,
    pub recipient: String,
    pub subject: String,
}

/// 病毒扫描任务载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanFilePayload {
    pub tenant_id: String,
    pub file_id: i64,
}

/// 分块上传合并任务载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReassembleUploadPayload {
    pub upload_id: String,
    pub tenant_id: String,
}

/// 月度用量重置任务载荷
///
/// `period_key` 为空时重置当前账期。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetUsagePayload {
    pub period_key: Option<String>,
}

/// 过期数据清理任务载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupExpiredPayload {
    pub scope: CleanupScope,
}

/// 清理范围
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CleanupScope {
    #[serde(rename = "UPLOAD_SESSIONS")]
    UploadSessions,
    #[serde(rename = "TOKENS")]
    Tokens,
    #[serde(rename = "SHARES")]
    Shares,
}

impl Job {
    pub fn send_email(payload: &SendEmailPayload) -> JobdResult<Job> {
        Ok(Job::new(JobKind::SendEmail, serde_json::to_value(payload)?))
    }

    pub fn scan_file(payload: &ScanFilePayload) -> JobdResult<Job> {
        Ok(Job::new(JobKind::ScanFile, serde_json::to_value(payload)?))
    }

    pub fn reassemble_upload(payload: &ReassembleUploadPayload) -> JobdResult<Job> {
        Ok(Job::new(
            JobKind::ReassembleUpload,
            serde_json::to_value(payload)?,
        ))
    }

    pub fn reset_monthly_usage(payload: &ResetUsagePayload) -> JobdResult<Job> {
        Ok(Job::new(
            JobKind::ResetMonthlyUsage,
            serde_json::to_value(payload)?,
        ))
    }

    pub fn cleanup_expired(scope: CleanupScope) -> JobdResult<Job> {
        Ok(Job::new(
            JobKind::CleanupExpired,
            serde_json::to_value(&CleanupExpiredPayload { scope })?,
        ))
    }

    /// 解析类型化载荷
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> JobdResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_round_trip() {
        let payload = SendEmailPayload {
            tenant_id: "t-1".to_string(),
            email_id: 42,
            recipient: "user@example.com".to_string(),
            subject: "hello".to_string(),
        };
        let job = Job::send_email(&payload).unwrap();
        assert_eq!(job.kind, JobKind::SendEmail);

        let parsed: SendEmailPayload = job.parse_payload().unwrap();
        assert_eq!(parsed.email_id, 42);
        assert_eq!(parsed.recipient, "user@example.com");
    }

    #[test]
    fn test_parse_wrong_payload_type_fails() {
        let job = Job::cleanup_expired(CleanupScope::Tokens).unwrap();
        let parsed: Result<SendEmailPayload, _> = job.parse_payload();
        assert!(parsed.is_err());
    }
}
