pub mod cron_utils;
pub mod periodic;
pub mod retry_policy;

pub use cron_utils::CronSchedule;
pub use periodic::{PeriodicEntry, PeriodicScheduler};
pub use retry_policy::{RetryConfig, RetryPolicy};
