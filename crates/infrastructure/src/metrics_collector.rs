//! 任务执行指标
//!
//! 基于 metrics crate 输出计数器、仪表和直方图，供外部Prometheus
//! 抓取；exporter 由二进制入口安装。

use metrics::{counter, gauge, histogram};
use tracing::debug;

/// 指标收集器
///
/// 进程内构造一次，随其余组件一起注入。指标名对外稳定：
/// - `jobs_succeeded_total` / `jobs_failed_total` / `jobs_retried_total`（按kind标签）
/// - `queue_depth`
/// - `job_execution_seconds`（按kind标签）
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// 记录一次任务成功及其执行耗时
    pub fn record_job_success(&self, kind: &str, duration_seconds: f64) {
        counter!("jobs_succeeded_total", "kind" => kind.to_string()).increment(1);
        histogram!("job_execution_seconds", "kind" => kind.to_string()).record(duration_seconds);
        debug!(
            kind = kind,
            duration_seconds = duration_seconds,
            "job success recorded"
        );
    }

    /// 记录一次终态失败（含永久失败与重试耗尽）
    pub fn record_job_failure(&self, kind: &str) {
        counter!("jobs_failed_total", "kind" => kind.to_string()).increment(1);
    }

    /// 记录一次重试投递
    pub fn record_job_retry(&self, kind: &str) {
        counter!("jobs_retried_total", "kind" => kind.to_string()).increment(1);
    }

    /// 更新队列深度仪表
    pub fn update_queue_depth(&self, depth: u64) {
        gauge!("queue_depth").set(depth as f64);
    }
}
