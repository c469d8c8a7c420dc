//! Process-local [`RateLimiter`]. Suitable for a single instance and for
//! tests; multi-instance deployments use the Postgres limiter in `lcg-db`.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use lcg_risk::{RateDecision, SlidingWindowLog, WindowQuota};

use crate::ports::RateLimiter;

#[derive(Debug, Default)]
pub struct InMemoryRateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

#[derive(Debug)]
struct Bucket {
    window: Duration,
    log: SlidingWindowLog,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().map(|b| b.len()).unwrap_or(0)
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check_and_record(
        &self,
        key: &str,
        quota: WindowQuota,
        now: DateTime<Utc>,
    ) -> Result<RateDecision> {
        let mut buckets = self
            .buckets
            .lock()
            .map_err(|_| anyhow!("rate limiter state poisoned"))?;
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            window: quota.window,
            log: SlidingWindowLog::new(),
        });
        bucket.window = quota.window;
        Ok(bucket.log.check_and_record(now, quota))
    }

    async fn prune(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut buckets = self
            .buckets
            .lock()
            .map_err(|_| anyhow!("rate limiter state poisoned"))?;
        let mut dropped = 0u64;
        for bucket in buckets.values_mut() {
            dropped += bucket.log.prune(now, bucket.window) as u64;
        }
        buckets.retain(|_, b| !b.log.is_empty());
        Ok(dropped)
    }
}
