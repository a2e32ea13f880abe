//! Redis implementation of the atomic admission scripts.
//!
//! Both steps run as Lua scripts, which Redis executes without interleaving
//! commands from other clients.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use tracing::{debug, info};

use super::shared::{AtomicScripts, BucketCall, SharedStore, WindowCall};
use crate::config::StoreConfig;
use crate::error::Result;

/// Sorted-set sliding window.
///
/// KEYS[1] key, ARGV: now, cutoff, limit, window seconds, tie-breaker.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local cutoff = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local window = tonumber(ARGV[4])
local member = ARGV[5]

redis.call('ZREMRANGEBYSCORE', key, 0, cutoff)

local count = redis.call('ZCARD', key)

if count < limit then
    redis.call('ZADD', key, now, member)
    redis.call('EXPIRE', key, window)
    return 1
else
    return 0
end
"#;

/// Hash-backed token bucket with lazy refill.
///
/// KEYS[1] key, ARGV: capacity, refill rate per second, requested tokens,
/// now in seconds.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local requested = tonumber(ARGV[3])
local now = tonumber(ARGV[4])

local bucket = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(bucket[1])
local last_refill = tonumber(bucket[2])

if tokens == nil then
    tokens = capacity
    last_refill = now
else
    local added = math.floor((now - last_refill) * refill_rate)
    if added > 0 then
        tokens = math.min(capacity, tokens + added)
        last_refill = now
    end
end

local admitted = 0
if tokens >= requested then
    tokens = tokens - requested
    admitted = 1
end

redis.call('HSET', key, 'tokens', tokens, 'last_refill', last_refill)
redis.call('EXPIRE', key, {expiry})
return admitted
"#;

/// Expiry applied to token bucket keys, in seconds.
pub const BUCKET_EXPIRY_SECS: u64 = 600;

fn token_bucket_script() -> String {
    TOKEN_BUCKET_SCRIPT.replace("{expiry}", &BUCKET_EXPIRY_SECS.to_string())
}

/// Runs the admission scripts against a Redis server.
#[derive(Clone)]
pub struct RedisScripts {
    connection: MultiplexedConnection,
    window_script: Script,
    bucket_script: Script,
}

impl std::fmt::Debug for RedisScripts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisScripts").finish_non_exhaustive()
    }
}

impl RedisScripts {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        info!("Connected to Redis");
        Ok(Self::from_connection(connection))
    }

    /// Wrap an existing connection.
    pub fn from_connection(connection: MultiplexedConnection) -> Self {
        Self {
            connection,
            window_script: Script::new(SLIDING_WINDOW_SCRIPT),
            bucket_script: Script::new(&token_bucket_script()),
        }
    }
}

#[async_trait]
impl AtomicScripts for RedisScripts {
    async fn sliding_window(&self, call: &WindowCall) -> Result<bool> {
        let mut connection = self.connection.clone();
        let admitted: i64 = self
            .window_script
            .key(&call.key)
            .arg(call.now_nanos)
            .arg(call.cutoff_nanos)
            .arg(call.limit)
            .arg(call.window_secs)
            .arg(&call.tie_breaker)
            .invoke_async(&mut connection)
            .await?;
        Ok(admitted == 1)
    }

    async fn token_bucket(&self, call: &BucketCall) -> Result<bool> {
        let mut connection = self.connection.clone();
        let admitted: i64 = self
            .bucket_script
            .key(&call.key)
            .arg(call.capacity)
            .arg(call.refill_rate_per_sec)
            .arg(call.requested)
            .arg(call.now_secs)
            .invoke_async(&mut connection)
            .await?;
        Ok(admitted == 1)
    }
}

/// A shared store backed by Redis.
pub type RedisStore = SharedStore<RedisScripts>;

impl SharedStore<RedisScripts> {
    /// Connect using the store section of the service configuration.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        debug!(prefix = %config.key_prefix, "Connecting shared rate limiter store");
        let scripts = RedisScripts::connect(&config.redis_url).await?;
        Ok(SharedStore::new(scripts)
            .with_key_prefix(config.key_prefix.clone())
            .with_operation_timeout(config.operation_timeout()))
    }
}
