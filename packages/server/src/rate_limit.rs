//! Fixed-window request counters shared across server replicas.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::AppError;

pub const WINDOW_SECS: u64 = 60;
/// Counters outlive their window so a late increment still sees it.
const EXPIRE_SECS: i64 = 120;

#[derive(Debug, thiserror::Error)]
#[error("rate limit store unavailable: {0}")]
pub struct CounterError(String);

/// Increments and returns the hit count of `key` within `window`.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn incr(&self, key: &str, window: u64) -> Result<u64, CounterError>;
}

pub struct RedisCounterStore {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisCounterStore {
    pub fn new(url: &str) -> Result<Self, CounterError> {
        let client = redis::Client::open(url).map_err(|e| CounterError(e.to_string()))?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CounterError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CounterError(e.to_string()))?;
        *guard = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str, window: u64) -> Result<u64, CounterError> {
        let mut conn = self.connection().await?;
        let result: Result<(u64, i64), _> = redis::pipe()
            .atomic()
            .incr(key, 1u64)
            .expire(key, EXPIRE_SECS)
            .query_async(&mut conn)
            .await;
        match result {
            Ok((count, _)) => Ok(count),
            Err(e) => {
                // Drop the cached connection so the next call reconnects.
                *self.conn.lock().await = None;
                Err(CounterError(format!("window {window}: {e}")))
            }
        }
    }
}

/// In-process counters for single-replica deployments and tests.
#[derive(Default)]
pub struct MemoryCounterStore {
    counts: DashMap<String, (u64, u64)>,
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str, window: u64) -> Result<u64, CounterError> {
        let mut entry = self.counts.entry(key.to_string()).or_insert((window, 0));
        if entry.0 != window {
            *entry = (window, 0);
        }
        entry.1 += 1;
        Ok(entry.1)
    }
}

/// Per-key limiter over a [`CounterStore`].
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    per_minute: u32,
    fail_open: bool,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, per_minute: u32, fail_open: bool) -> Self {
        Self {
            store,
            per_minute,
            fail_open,
        }
    }

    pub async fn check(&self, scope: &str, principal: &str) -> Result<(), AppError> {
        let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        self.check_at(scope, principal, now).await
    }

    async fn check_at(&self, scope: &str, principal: &str, now: u64) -> Result<(), AppError> {
        let window = now / WINDOW_SECS;
        let key = format!("ratelimit:{scope}:{principal}:{window}");
        match self.store.incr(&key, window).await {
            Ok(count) if count > u64::from(self.per_minute) => Err(AppError::RateLimited {
                retry_after: WINDOW_SECS - now % WINDOW_SECS,
            }),
            Ok(_) => Ok(()),
            Err(e) if self.fail_open => {
                warn!(error = %e, scope, "rate limiter unavailable, allowing request");
                Ok(())
            }
            Err(e) => Err(AppError::Internal(e.to_string())),
        }
    }
}
