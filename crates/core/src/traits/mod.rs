pub mod collaborators;
pub mod handler;
pub mod queue;
pub mod repository;

pub use collaborators::{
    EmailStatus, EmailTransport, ExpiryStore, FileStore, MailStore, OutboundEmail, PlanProvider,
    ScanVerdict, StoredFile, VirusScanner,
};
pub use handler::{CancelToken, ExecutionOutcome, JobHandler};
pub use queue::{JobQueue, NackDisposition};
pub use repository::{
    AssembledFile, ChunkRecord, ChunkStore, RateStore, UploadSessionRepository, UsageRepository,
};
