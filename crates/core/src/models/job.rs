use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务单元
///
/// 表示一次可延迟、可重试的后台工作，由任务队列持有，仅由Worker池推进状态。
///
/// # 字段说明
///
/// - `id`: 任务的唯一标识符（UUID）
/// - `kind`: 任务类型，决定由哪个处理器执行
/// - `payload`: 任务参数，JSON 格式（类型化载荷见 `payload` 模块）
/// - `attempt`: 已执行次数，仅在 nack 时递增
/// - `max_attempts`: 最大执行次数，达到后进入终态 Failed
/// - `state`: 任务状态，终态（Succeeded/Failed）不可再变更
/// - `created_at`: 任务创建时间
/// - `next_run_at`: 下次可被取出执行的时间（延迟任务、重试退避）
/// - `completed_at`: 进入终态的时间
/// - `last_error`: 最近一次失败原因
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub attempt: i32,
    pub max_attempts: i32,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub next_run_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// 任务类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobKind {
    #[serde(rename = "SEND_EMAIL")]
    SendEmail,
    #[serde(rename = "SCAN_FILE")]
    ScanFile,
    #[serde(rename = "REASSEMBLE_UPLOAD")]
    ReassembleUpload,
    #[serde(rename = "RESET_MONTHLY_USAGE")]
    ResetMonthlyUsage,
    #[serde(rename = "CLEANUP_EXPIRED")]
    CleanupExpired,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::SendEmail => "SEND_EMAIL",
            JobKind::ScanFile => "SCAN_FILE",
            JobKind::ReassembleUpload => "REASSEMBLE_UPLOAD",
            JobKind::ResetMonthlyUsage => "RESET_MONTHLY_USAGE",
            JobKind::CleanupExpired => "CLEANUP_EXPIRED",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务状态
///
/// `Succeeded` 和 `Failed` 为终态，进入终态后状态不可再变更。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobState {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "SUCCEEDED")]
    Succeeded,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "RETRYING")]
    Retrying,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Succeeded => "SUCCEEDED",
            JobState::Failed => "FAILED",
            JobState::Retrying => "RETRYING",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Job {
    /// 创建新任务
    pub fn new(kind: JobKind, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            payload,
            attempt: 0,
            max_attempts: 3,
            state: JobState::Pending,
            created_at: now,
            next_run_at: now,
            completed_at: None,
            last_error: None,
        }
    }

    /// 创建延迟任务
    pub fn with_delay(kind: JobKind, payload: serde_json::Value, delay: Duration) -> Self {
        let mut job = Self::new(kind, payload);
        job.next_run_at = job.created_at + delay;
        job
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// 更新任务状态
    ///
    /// 终态不可变更：对终态任务的更新会被忽略。进入终态时记录 `completed_at`。
    pub fn update_state(&mut self, state: JobState) {
        if self.is_terminal() {
            return;
        }
        self.state = state;
        if state.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}
