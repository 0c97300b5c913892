//! [`Redis`] [`CounterStore`] implementation.

use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::{
    bb8::{self, Pool},
    redis::{self, Script},
    RedisConnectionManager,
};
use common::DateTime;
use derive_more::{Display, Error as StdError, From};
use rand::Rng as _;
use tracerr::Traced;

use super::{CounterStore, Failure, Hit};
use crate::infra::counters;

/// Atomically trims the sliding window and registers a hit if it fits.
///
/// Returns `{allowed, count, oldest_ms}`, with `oldest_ms = -1` for an empty
/// window.
const HIT_SCRIPT: &str = r"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local allowed = 0
if count < limit then
  redis.call('ZADD', key, now, ARGV[4])
  count = count + 1
  allowed = 1
end
redis.call('PEXPIRE', key, window)
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_ms = -1
if oldest[2] then
  oldest_ms = tonumber(oldest[2])
end
return {allowed, count, oldest_ms}
";

/// Trims the sliding window and reports it without registering a hit.
///
/// Returns `{count, oldest_ms}`, with `oldest_ms = -1` for an empty window.
const PEEK_SCRIPT: &str = r"
local key = KEYS[1]
redis.call('ZREMRANGEBYSCORE', key, '-inf', tonumber(ARGV[1]) - tonumber(ARGV[2]))
local count = redis.call('ZCARD', key)
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_ms = -1
if oldest[2] then
  oldest_ms = tonumber(oldest[2])
end
return {count, oldest_ms}
";

/// Atomically counts a failure and installs a lockout once the threshold is
/// reached.
///
/// Returns the lockout end in milliseconds, or `-1` if none is installed.
const FAIL_SCRIPT: &str = r"
local failures = redis.call('INCR', KEYS[1])
redis.call('PEXPIRE', KEYS[1], ARGV[4])
if failures >= tonumber(ARGV[2]) then
  local until_ms = tonumber(ARGV[1]) + tonumber(ARGV[3])
  redis.call('SET', KEYS[2], until_ms, 'PX', ARGV[3])
  redis.call('DEL', KEYS[1])
  return until_ms
end
return -1
";

/// [`CounterStore`] shared via [Redis].
///
/// [Redis]: https://redis.io
#[derive(Clone, Debug)]
pub struct Redis {
    /// Pool of [Redis] connections.
    ///
    /// [Redis]: https://redis.io
    pool: Pool<RedisConnectionManager>,
}

impl Redis {
    /// Connects a new [`Redis`] store to the provided `url`.
    ///
    /// # Errors
    ///
    /// If the `url` is invalid or the pool cannot be built.
    pub async fn connect(url: &str) -> Result<Self, Traced<counters::Error>> {
        let manager = RedisConnectionManager::new(url)
            .map_err(tracerr::from_and_wrap!(=> Error))
            .map_err(tracerr::map_from)?;
        let pool = Pool::builder()
            .connection_timeout(Duration::from_secs(1))
            .build(manager)
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))
            .map_err(tracerr::map_from)?;
        Ok(Self { pool })
    }

    /// Checks out a pooled connection.
    async fn connection(
        &self,
    ) -> Result<
        bb8::PooledConnection<'_, RedisConnectionManager>,
        Traced<counters::Error>,
    > {
        self.pool
            .get()
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))
            .map_err(tracerr::map_from)
    }
}

/// Converts the provided milliseconds into a [`DateTime`], treating
/// negative values as absent.
fn from_millis(ms: i64) -> Option<DateTime> {
    (ms >= 0).then(|| DateTime::from_unix_timestamp_millis(ms)).flatten()
}

/// Converts the provided [`Duration`] into milliseconds.
fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl CounterStore for Redis {
    async fn hit(
        &self,
        key: &str,
        at: DateTime,
        window: Duration,
        limit: u32,
    ) -> Result<Hit, Traced<counters::Error>> {
        let mut conn = self.connection().await.map_err(tracerr::wrap!())?;
        let member = format!(
            "{}-{:08x}",
            at.unix_timestamp_millis(),
            rand::thread_rng().gen::<u32>(),
        );
        let (allowed, count, oldest): (i64, i64, i64) = Script::new(HIT_SCRIPT)
            .key(format!("{key}:hits"))
            .arg(at.unix_timestamp_millis())
            .arg(millis(window))
            .arg(limit)
            .arg(member)
            .invoke_async(&mut *conn)
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))
            .map_err(tracerr::map_from)?;

        Ok(Hit {
            allowed: allowed == 1,
            count: u32::try_from(count).unwrap_or(u32::MAX),
            oldest: from_millis(oldest),
        })
    }

    async fn peek(
        &self,
        key: &str,
        at: DateTime,
        window: Duration,
        limit: u32,
    ) -> Result<Hit, Traced<counters::Error>> {
        let mut conn = self.connection().await.map_err(tracerr::wrap!())?;
        let (count, oldest): (i64, i64) = Script::new(PEEK_SCRIPT)
            .key(format!("{key}:hits"))
            .arg(at.unix_timestamp_millis())
            .arg(millis(window))
            .invoke_async(&mut *conn)
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))
            .map_err(tracerr::map_from)?;

        let count = u32::try_from(count).unwrap_or(u32::MAX);
        Ok(Hit {
            allowed: count < limit,
            count,
            oldest: from_millis(oldest),
        })
    }

    async fn lockout(
        &self,
        key: &str,
        at: DateTime,
    ) -> Result<Option<DateTime>, Traced<counters::Error>> {
        let mut conn = self.connection().await.map_err(tracerr::wrap!())?;
        let until: Option<i64> = redis::cmd("GET")
            .arg(format!("{key}:lock"))
            .query_async(&mut *conn)
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))
            .map_err(tracerr::map_from)?;

        Ok(until
            .and_then(from_millis)
            .filter(|until| !until.has_passed(at)))
    }

    async fn last_success(
        &self,
        key: &str,
    ) -> Result<Option<DateTime>, Traced<counters::Error>> {
        let mut conn = self.connection().await.map_err(tracerr::wrap!())?;
        let at: Option<i64> = redis::cmd("GET")
            .arg(format!("{key}:ok"))
            .query_async(&mut *conn)
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))
            .map_err(tracerr::map_from)?;

        Ok(at.and_then(from_millis))
    }

    async fn succeed(
        &self,
        key: &str,
        at: DateTime,
        retain: Duration,
    ) -> Result<(), Traced<counters::Error>> {
        let mut conn = self.connection().await.map_err(tracerr::wrap!())?;
        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(format!("{key}:ok"))
            .arg(at.unix_timestamp_millis())
            .arg("PX")
            .arg(millis(retain).max(1))
            .ignore()
            .cmd("DEL")
            .arg(format!("{key}:fail"))
            .arg(format!("{key}:lock"))
            .ignore()
            .query_async(&mut *conn)
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))
            .map_err(tracerr::map_from)?;
        Ok(())
    }

    async fn fail(
        &self,
        key: &str,
        at: DateTime,
        failure: Failure,
    ) -> Result<Option<DateTime>, Traced<counters::Error>> {
        let mut conn = self.connection().await.map_err(tracerr::wrap!())?;
        let until: i64 = Script::new(FAIL_SCRIPT)
            .key(format!("{key}:fail"))
            .key(format!("{key}:lock"))
            .arg(at.unix_timestamp_millis())
            .arg(failure.threshold)
            .arg(millis(failure.lockout).max(1))
            .arg(millis(failure.retain).max(1))
            .invoke_async(&mut *conn)
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))
            .map_err(tracerr::map_from)?;

        Ok(from_millis(until))
    }
}

/// [`Redis`] store error.
#[derive(Debug, Display, From, StdError)]
pub enum Error {
    /// [Redis] command error.
    ///
    /// [Redis]: https://redis.io
    #[display("Redis command failed: {_0}")]
    Command(redis::RedisError),

    /// Connection pool error.
    #[display("Redis connection pool failed: {_0}")]
    Pool(bb8::RunError<redis::RedisError>),
}
