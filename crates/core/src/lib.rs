pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::{JobdError, JobdResult};
pub use models::{
    CleanupExpiredPayload, CleanupScope, Job, JobKind, JobState, Limit, PlanLimits, PlanTier,
    RateWindow, ReassembleUploadPayload, ResetUsagePayload, ScanFilePayload, SendEmailPayload,
    UploadSession, UsageField, UsagePeriod,
};
pub use traits::{
    AssembledFile, CancelToken, ChunkRecord, ChunkStore, EmailStatus, EmailTransport,
    ExecutionOutcome, ExpiryStore, FileStore, JobHandler, JobQueue, MailStore, NackDisposition,
    OutboundEmail, PlanProvider, RateStore, ScanVerdict, StoredFile, UploadSessionRepository,
    UsageRepository, VirusScanner,
};
