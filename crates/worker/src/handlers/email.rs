use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use jobd_core::models::{Job, JobKind, SendEmailPayload, UsageField, UsagePeriod};
use jobd_core::traits::{
    CancelToken, EmailStatus, EmailTransport, ExecutionOutcome, JobHandler, MailStore,
};
use jobd_core::JobdResult;
use jobd_domain::QuotaLedger;

/// 邮件发送处理器
///
/// 幂等依据是持久层邮件记录的投递状态：记录已是 SENT 时直接确认，
/// 崩溃后的重放不会重复发送。用量在发送确认成功后入账。
pub struct SendEmailHandler {
    mail_store: Arc<dyn MailStore>,
    transport: Arc<dyn EmailTransport>,
    ledger: Arc<QuotaLedger>,
}

impl SendEmailHandler {
    pub fn new(
        mail_store: Arc<dyn MailStore>,
        transport: Arc<dyn EmailTransport>,
        ledger: Arc<QuotaLedger>,
    ) -> Self {
        Self {
            mail_store,
            transport,
            ledger,
        }
    }
}

#[async_trait]
impl JobHandler for SendEmailHandler {
    fn kind(&self) -> JobKind {
        JobKind::SendEmail
    }

    async fn execute(&self, job: &Job, cancel: &CancelToken) -> JobdResult<ExecutionOutcome> {
        let payload: SendEmailPayload = match job.parse_payload() {
            Ok(payload) => payload,
            Err(e) => return Ok(ExecutionOutcome::permanent(format!("载荷解析失败: {e}"))),
        };

        // 先查状态再动作
        match self.mail_store.status(payload.email_id).await? {
            None => {
                return Ok(ExecutionOutcome::permanent(format!(
                    "邮件记录不存在: {}",
                    payload.email_id
                )))
            }
            Some(EmailStatus::Sent) => {
                debug!(email_id = payload.email_id, "email already sent, skipping");
                return Ok(ExecutionOutcome::Success);
            }
            Some(_) => {}
        }

        if cancel.is_cancelled() {
            return Ok(ExecutionOutcome::transient("发送前收到取消信号"));
        }

        let email = match self.mail_store.get(payload.email_id).await? {
            Some(email) => email,
            None => {
                return Ok(ExecutionOutcome::permanent(format!(
                    "邮件记录不存在: {}",
                    payload.email_id
                )))
            }
        };

        if let Err(e) = self.transport.send(&email).await {
            return Ok(ExecutionOutcome::transient(format!("发送失败: {e}")));
        }

        self.mail_store.mark_sent(payload.email_id).await?;

        // 确认成功后入账；入账失败记录对账错误但仍确认任务，避免重复发送
        let period_key = UsagePeriod::current_period_key();
        if let Err(e) = self
            .ledger
            .debit(&payload.tenant_id, &period_key, UsageField::EmailsSent, 1)
            .await
        {
            error!(
                tenant_id = %payload.tenant_id,
                email_id = payload.email_id,
                error = %e,
                "reconciliation: email sent but usage debit failed"
            );
        }

        info!(
            tenant_id = %payload.tenant_id,
            email_id = payload.email_id,
            recipient = %email.recipient,
            "email sent"
        );
        Ok(ExecutionOutcome::Success)
    }

    async fn on_terminal_failure(&self, job: &Job) -> JobdResult<()> {
        let payload: SendEmailPayload = match job.parse_payload() {
            Ok(payload) => payload,
            Err(_) => return Ok(()),
        };
        // 已发送的记录不再改写
        match self.mail_store.status(payload.email_id).await? {
            Some(EmailStatus::Sent) | None => Ok(()),
            Some(_) => self.mail_store.mark_failed(payload.email_id).await,
        }
    }
}
