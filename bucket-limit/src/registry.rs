use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use opentelemetry::metrics::Meter;
use quanta::Clock;

use super::BucketConfig;
use super::LimitError;
use super::Reason;
use super::TokenBucket;
use crate::metrics::RegistryMetrics;
use crate::token_bucket::Admission;

/// Per-client rate limiting over a map of [`TokenBucket`]s.
///
/// Every client identifier gets its own bucket, created on first sight with the
/// registry's [`BucketConfig`]. Buckets for different clients never share a token.
///
/// # Thread Safety
///
/// - The map is a [`DashMap`], so lookups for unrelated clients only contend when
///   they hash to the same shard, and only for the duration of the lookup.
/// - A miss goes through the map's entry API, so concurrent first calls for the
///   same client build exactly one bucket.
/// - The map guard is released before the bucket's own compare-and-swap runs.
///
/// # Memory
///
/// Buckets are never removed automatically. Callers with unbounded client
/// cardinality can call [`RateLimiterRegistry::evict_idle`] periodically.
#[derive(Debug)]
pub struct RateLimiterRegistry {
    buckets: DashMap<String, Arc<TokenBucket>>,
    config: BucketConfig,
    clock: Clock,
    instruments: RegistryMetrics,
}

impl RateLimiterRegistry {
    /// Creates an empty registry.
    ///
    /// # Errors
    ///
    /// Returns [`LimitError::InvalidConfiguration`] for a zero token limit or an
    /// interval shorter than one millisecond.
    pub fn new(refill_interval: Duration, token_limit: usize) -> Result<Self, LimitError> {
        let config = BucketConfig::new(refill_interval, token_limit)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: BucketConfig) -> Self {
        Self::with_clock(config, Clock::new())
    }

    /// Creates an empty registry whose buckets all read time from `clock`.
    pub fn with_clock(config: BucketConfig, clock: Clock) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
            clock,
            instruments: RegistryMetrics::new(),
        }
    }

    /// Records metrics through `meter` instead of the global meter provider.
    pub fn with_meter(mut self, meter: &Meter) -> Self {
        self.instruments = RegistryMetrics::from_meter(meter);
        self
    }

    /// Decides whether `client_id` may make one more request right now.
    ///
    /// # Errors
    ///
    /// Returns [`LimitError::InvalidArgument`] if `client_id` is empty.
    pub fn allow(&self, client_id: &str) -> Result<bool, LimitError> {
        self.check(client_id).map(|flow| flow.is_continue())
    }

    /// Like [`RateLimiterRegistry::allow`], but a rejection carries how long the
    /// client has to wait for its bucket to refill.
    ///
    /// # Errors
    ///
    /// Returns [`LimitError::InvalidArgument`] if `client_id` is empty.
    pub fn check(&self, client_id: &str) -> Result<ControlFlow<Reason>, LimitError> {
        if client_id.is_empty() {
            return Err(LimitError::InvalidArgument(
                "client id must not be empty".to_string(),
            ));
        }

        loop {
            let flow = match self.bucket(client_id).acquire() {
                // Evicted between lookup and check; the map now holds its replacement.
                Admission::Retired => continue,
                admission => admission.into_flow(),
            };

            let allowed = flow.is_continue();
            self.instruments.record_admission(allowed);
            if !allowed {
                tracing::trace!(client_id, "request denied");
            }
            return Ok(flow);
        }
    }

    /// Removes every bucket whose refill is due and returns how many were removed.
    ///
    /// A due bucket would reset to full on its next check, which is exactly how a
    /// newly created bucket starts, so eviction never changes an admission decision.
    pub fn evict_idle(&self) -> usize {
        let mut evicted = 0;
        self.buckets.retain(|_, bucket| {
            let idle = bucket.retire_if_idle();
            evicted += usize::from(idle);
            !idle
        });

        if evicted > 0 {
            tracing::debug!(
                evicted,
                remaining = self.buckets.len(),
                "evicted idle token buckets"
            );
        }
        self.instruments.record_evicted(evicted);
        evicted
    }

    pub fn config(&self) -> BucketConfig {
        self.config
    }

    /// Number of clients currently tracked.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.buckets.contains_key(client_id)
    }

    /// Tokens left in `client_id`'s bucket as of its last check, or `None` if the
    /// client has not been seen. Never creates a bucket.
    pub fn tokens_remaining(&self, client_id: &str) -> Option<usize> {
        self.buckets
            .get(client_id)
            .map(|bucket| bucket.value().tokens_remaining())
    }

    pub(crate) fn bucket(&self, client_id: &str) -> Arc<TokenBucket> {
        if let Some(bucket) = self.buckets.get(client_id) {
            return Arc::clone(bucket.value());
        }

        let bucket = self
            .buckets
            .entry(client_id.to_owned())
            .or_insert_with(|| {
                tracing::debug!(client_id, "creating token bucket");
                self.instruments.record_created();
                Arc::new(TokenBucket::with_clock(self.config, self.clock.clone()))
            });
        Arc::clone(bucket.value())
    }
}
