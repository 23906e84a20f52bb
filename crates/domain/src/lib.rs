pub mod quota;
pub mod rate_limiter;
pub mod reassembler;

pub use quota::QuotaLedger;
pub use rate_limiter::RateLimiter;
pub use reassembler::{ChunkSubmitResponse, ChunkSubmitStatus, FinalizeResult, UploadReassembler};
