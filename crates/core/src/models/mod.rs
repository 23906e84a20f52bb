pub mod job;
pub mod payload;
pub mod plan;
pub mod rate;
pub mod upload;
pub mod usage;

pub use job::{Job, JobKind, JobState};
pub use payload::{
    CleanupExpiredPayload, CleanupScope, ReassembleUploadPayload, ResetUsagePayload,
    ScanFilePayload, SendEmailPayload,
};
pub use plan::{Limit, PlanLimits, PlanTier};
pub use rate::RateWindow;
pub use upload::UploadSession;
pub use usage::{UsageField, UsagePeriod};
