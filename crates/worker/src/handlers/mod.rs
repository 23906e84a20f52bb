//! 任务处理器
//!
//! 每种任务类型一个处理器。投递语义为至少一次，处理器先查持久实体
//! 的状态再动作：已发送的邮件不重发，已合并的上传直接确认。

pub mod email;
pub mod maintenance;
pub mod reassemble;
pub mod scan;

pub use email::SendEmailHandler;
pub use maintenance::{CleanupExpiredHandler, ResetMonthlyUsageHandler};
pub use reassemble::ReassembleUploadHandler;
pub use scan::ScanFileHandler;
