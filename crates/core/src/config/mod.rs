//! 统一配置管理
//!
//! 加载顺序：默认值 → TOML配置文件 → 环境变量覆盖（前缀 JOBD，分隔符 __）。
//! 加载后执行一次有效性校验。

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// 系统配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub retry: RetrySettings,
    pub scheduler: SchedulerConfig,
    pub upload: UploadConfig,
    pub rate_limiter: RateLimiterConfig,
    pub database: DatabaseConfig,
    pub observability: ObservabilityConfig,
}

/// 任务队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// 可见性超时（秒）：取出未确认的任务超过该时长后重新可见
    pub visibility_timeout_seconds: u64,
    /// 默认最大执行次数
    pub max_attempts: i32,
}

/// Worker池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// 并发Worker数量
    pub worker_count: usize,
    /// 队列为空时的轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 软超时（秒）：到达后向处理器发出协作取消信号
    pub soft_timeout_seconds: u64,
    /// 硬超时（秒）：到达后放弃执行并nack重投
    pub hard_timeout_seconds: u64,
}

/// 重试退避配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// 基础重试间隔（秒）
    pub base_delay_seconds: u64,
    /// 最大重试间隔（秒）
    pub max_delay_seconds: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

/// 周期调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// 调度检查间隔（秒）
    pub tick_interval_seconds: u64,
}

/// 分块上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 分块暂存目录
    pub chunk_dir: String,
    /// 合并产物目录
    pub final_dir: String,
    /// 未完成会话的保留时长（小时），超时由清理任务回收
    pub session_ttl_hours: i64,
}

/// 速率限制配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// 计数存储后端："memory" 或 "redis"
    pub backend: String,
    pub redis_url: String,
    /// 固定窗口长度（秒）
    pub window_seconds: u64,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// 关闭时账本与会话使用内存存储（嵌入式部署）
    pub enabled: bool,
    pub url: String,
    pub max_connections: u32,
}

/// 可观测性配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志格式："json" 或 "pretty"
    pub log_format: String,
    /// Prometheus指标监听地址，空则不启动exporter
    pub metrics_listen: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig {
                visibility_timeout_seconds: 300,
                max_attempts: 3,
            },
            worker: WorkerConfig {
                enabled: true,
                worker_count: 4,
                poll_interval_ms: 500,
                soft_timeout_seconds: 1500,
                hard_timeout_seconds: 1800,
            },
            retry: RetrySettings {
                base_delay_seconds: 60,
                max_delay_seconds: 3600,
                backoff_multiplier: 2.0,
                jitter_factor: 0.1,
            },
            scheduler: SchedulerConfig {
                enabled: true,
                tick_interval_seconds: 60,
            },
            upload: UploadConfig {
                chunk_dir: "data/chunks".to_string(),
                final_dir: "data/files".to_string(),
                session_ttl_hours: 24,
            },
            rate_limiter: RateLimiterConfig {
                backend: "memory".to_string(),
                redis_url: "redis://127.0.0.1:6379/2".to_string(),
                window_seconds: 60,
            },
            database: DatabaseConfig {
                enabled: false,
                url: "postgresql://localhost/jobd".to_string(),
                max_connections: 10,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                log_format: "pretty".to_string(),
                metrics_listen: Some("127.0.0.1:9090".to_string()),
            },
        }
    }
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// # 参数
    ///
    /// * `config_path` - 配置文件路径，为 None 时依次尝试默认路径
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder()
            .add_source(ConfigBuilder::try_from(&AppConfig::default()).context("构建默认配置失败")?);

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {path}"));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = ["config/jobd.toml", "jobd.toml", "/etc/jobd/config.toml"];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        // 环境变量覆盖，优先级最高，如 JOBD__WORKER__WORKER_COUNT=8
        builder = builder.add_source(
            Environment::with_prefix("JOBD")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 从TOML字符串加载配置
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    /// 序列化为TOML字符串
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// 校验配置有效性
    pub fn validate(&self) -> Result<()> {
        if self.queue.visibility_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("queue.visibility_timeout_seconds 必须大于0"));
        }
        if self.queue.max_attempts < 1 {
            return Err(anyhow::anyhow!("queue.max_attempts 必须至少为1"));
        }
        if self.worker.worker_count == 0 {
            return Err(anyhow::anyhow!("worker.worker_count 必须大于0"));
        }
        if self.worker.soft_timeout_seconds >= self.worker.hard_timeout_seconds {
            return Err(anyhow::anyhow!(
                "worker.soft_timeout_seconds 必须小于 hard_timeout_seconds"
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("retry.backoff_multiplier 必须不小于1.0"));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(anyhow::anyhow!("retry.jitter_factor 必须在0.0到1.0之间"));
        }
        if self.scheduler.tick_interval_seconds == 0 {
            return Err(anyhow::anyhow!("scheduler.tick_interval_seconds 必须大于0"));
        }
        if self.upload.session_ttl_hours <= 0 {
            return Err(anyhow::anyhow!("upload.session_ttl_hours 必须大于0"));
        }
        match self.rate_limiter.backend.as_str() {
            "memory" | "redis" => {}
            other => {
                return Err(anyhow::anyhow!("不支持的速率限制后端: {other}"));
            }
        }
        if self.rate_limiter.window_seconds == 0 {
            return Err(anyhow::anyhow!("rate_limiter.window_seconds 必须大于0"));
        }
        match self.observability.log_format.as_str() {
            "json" | "pretty" => {}
            other => {
                return Err(anyhow::anyhow!("不支持的日志格式: {other}"));
            }
        }
        Ok(())
    }
}
