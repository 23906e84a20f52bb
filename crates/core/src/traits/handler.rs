use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::JobdResult;
use crate::models::{Job, JobKind};

/// 处理器执行结果
///
/// 处理器用显式结果告知Worker池如何处置任务，Worker池据此应用重试
/// 策略，无需检查错误类型：
/// - `Success`: 确认任务，副作用必须已在返回前持久化
/// - `Transient`: 按指数退避重试，直至次数耗尽
/// - `Permanent`: 不重试，直接进入终态 Failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success,
    Transient { reason: String },
    Permanent { reason: String },
}

impl ExecutionOutcome {
    pub fn transient(reason: impl Into<String>) -> Self {
        ExecutionOutcome::Transient {
            reason: reason.into(),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        ExecutionOutcome::Permanent {
            reason: reason.into(),
        }
    }
}

/// 协作式取消令牌
///
/// 软超时到达时由Worker置位；处理器在检查点检查并尽快返回
/// `Transient`，任务随后按正常退避重试。
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// 任务处理器接口
///
/// 每种任务类型注册一个处理器。投递语义为至少一次，处理器必须幂等：
/// 崩溃后重放不得产生重复外部副作用（先查实体状态再动作）。
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// 本处理器负责的任务类型
    fn kind(&self) -> JobKind;

    /// 执行任务
    ///
    /// 返回 `Err` 按瞬时失败处理。
    async fn execute(&self, job: &Job, cancel: &CancelToken) -> JobdResult<ExecutionOutcome>;

    /// 任务进入终态 Failed 时执行一次的失败副作用（如将邮件标记为失败）
    async fn on_terminal_failure(&self, _job: &Job) -> JobdResult<()> {
        Ok(())
    }
}
