use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::info;

use jobd_core::traits::RateStore;
use jobd_core::{JobdError, JobdResult};

/// 比较并递增的Lua脚本，在Redis内原子执行：
/// 达到上限直接拒绝且不递增；首次递增时设置过期兜底清理。
const ADMIT_SCRIPT: &str = r"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current >= tonumber(ARGV[1]) then
  return 0
end
current = redis.call('INCR', KEYS[1])
if current == 1 then
  redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return 1
";

/// Redis速率计数存储
///
/// 多个Worker进程共享一致的速率计数。槽位键包含窗口编号，旧窗口的
/// 键不再被触达，由过期时间兜底清理；放行判断整体在一个Lua脚本内
/// 执行，与内存实现一样不存在读后写竞争。
pub struct RedisRateStore {
    conn: ConnectionManager,
    admit_script: Script,
    key_ttl_seconds: u64,
}

impl RedisRateStore {
    /// 连接Redis并构建存储，`key_ttl_seconds` 为槽位键的兜底过期时间
    pub async fn connect(url: &str, key_ttl_seconds: u64) -> JobdResult<Self> {
        let client =
            redis::Client::open(url).map_err(|e| JobdError::Redis(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| JobdError::Redis(e.to_string()))?;
        info!(url = url, "connected to redis rate store");
        Ok(Self {
            conn,
            admit_script: Script::new(ADMIT_SCRIPT),
            key_ttl_seconds,
        })
    }

    fn slot_key(key: &str, window_id: i64) -> String {
        format!("rate:{key}:{window_id}")
    }
}

#[async_trait]
impl RateStore for RedisRateStore {
    async fn try_admit(&self, key: &str, window_id: i64, limit: u32) -> JobdResult<bool> {
        let mut conn = self.conn.clone();
        let admitted: i64 = self
            .admit_script
            .key(Self::slot_key(key, window_id))
            .arg(limit)
            .arg(self.key_ttl_seconds)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| JobdError::Redis(e.to_string()))?;
        Ok(admitted == 1)
    }

    async fn count(&self, key: &str, window_id: i64) -> JobdResult<Option<u32>> {
        let mut conn = self.conn.clone();
        let count: Option<u32> = redis::cmd("GET")
            .arg(Self::slot_key(key, window_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| JobdError::Redis(e.to_string()))?;
        Ok(count.filter(|count| *count > 0))
    }
}
