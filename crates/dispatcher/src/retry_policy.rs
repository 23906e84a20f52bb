use std::time::Duration;

use rand::Rng;

use jobd_core::config::RetrySettings;

/// 重试策略配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 基础重试间隔（秒）
    pub base_interval_seconds: u64,
    /// 最大重试间隔（秒）
    pub max_interval_seconds: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_interval_seconds: 60,  // 1分钟
            max_interval_seconds: 3600, // 1小时
            backoff_multiplier: 2.0,
            jitter_factor: 0.1, // 10%的随机抖动
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            base_interval_seconds: settings.base_delay_seconds,
            max_interval_seconds: settings.max_delay_seconds,
            backoff_multiplier: settings.backoff_multiplier,
            jitter_factor: settings.jitter_factor,
        }
    }
}

/// 指数退避重试策略
///
/// 第 n 次重试的间隔为 `base * multiplier^n`，封顶于最大间隔，再叠加
/// ±jitter 的随机抖动，避免同批失败任务的重试风暴。
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// 第 `attempt` 次失败后的重试间隔（`attempt` 从0计）
    pub fn next_delay(&self, attempt: i32) -> Duration {
        let base = self.config.base_interval_seconds as f64;
        let backoff = base * self.config.backoff_multiplier.powi(attempt.max(0));
        let capped = backoff.min(self.config.max_interval_seconds as f64);

        let jittered = if self.config.jitter_factor > 0.0 {
            let jitter_range = capped * self.config.jitter_factor;
            let jitter = rand::rng().random_range(-jitter_range..=jitter_range);
            (capped + jitter).max(1.0)
        } else {
            capped.max(1.0)
        };
        Duration::from_secs_f64(jittered)
    }
}
