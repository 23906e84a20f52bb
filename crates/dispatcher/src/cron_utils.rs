use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use tracing::{debug, warn};

use jobd_core::{JobdError, JobdResult};

/// CRON表达式解析和触发判断
pub struct CronSchedule {
    schedule: Schedule,
}

impl CronSchedule {
    pub fn new(cron_expr: &str) -> JobdResult<Self> {
        let schedule = Schedule::from_str(cron_expr).map_err(|e| JobdError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { schedule })
    }

    /// 检查当前是否应该触发
    ///
    /// 判断依据是"自上次执行以来是否已越过一个应执行时间点"，因此
    /// 错过的时间点会在下一次检查时补触发一次。
    pub fn should_trigger(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_run {
            Some(last) => {
                if let Some(next_time) = self.schedule.after(&last).next() {
                    let should = next_time <= now;
                    if should {
                        debug!(
                            last_run = %last.format("%Y-%m-%d %H:%M:%S UTC"),
                            due = %next_time.format("%Y-%m-%d %H:%M:%S UTC"),
                            "periodic job due"
                        );
                    }
                    should
                } else {
                    warn!(
                        last_run = %last.format("%Y-%m-%d %H:%M:%S UTC"),
                        "no next execution time computable"
                    );
                    false
                }
            }
            None => {
                // 从未执行过：只看刚刚过去的一分钟，避免启动时补跑久远的时间点
                let check_from = now - Duration::minutes(1);
                self.schedule
                    .after(&check_from)
                    .next()
                    .is_some_and(|next_time| next_time <= now)
            }
        }
    }

    /// 下一次应执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 校验CRON表达式
    pub fn validate(cron_expr: &str) -> JobdResult<()> {
        Schedule::from_str(cron_expr).map_err(|e| JobdError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}
