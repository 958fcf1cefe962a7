use std::num::NonZeroUsize;
use std::time::Duration;

use crate::LimitError;
use crate::token_bucket::MAX_REFILL_INTERVAL_MS;
use crate::token_bucket::MAX_TOKEN_LIMIT;

/// Validated bucket parameters.
///
/// A registry holds one of these and hands a copy to every bucket it
/// creates, so validation happens exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    refill_interval_ms: u64,
    token_limit: NonZeroUsize,
}

impl BucketConfig {
    /// Creates a new `BucketConfig`.
    ///
    /// # Arguments
    ///
    /// * `refill_interval` - How long after the last refill a bucket snaps back to full.
    ///   Measured in whole milliseconds; any sub-millisecond remainder is dropped.
    /// * `token_limit` - The maximum, and full-refill, token count of a bucket.
    ///
    /// # Errors
    ///
    /// Returns [`LimitError::InvalidConfiguration`] if the interval is shorter than
    /// one millisecond or longer than a bucket can track, or if the token limit is
    /// zero or above [`MAX_TOKEN_LIMIT`].
    pub fn new(refill_interval: Duration, token_limit: usize) -> Result<Self, LimitError> {
        let refill_interval_ms = u64::try_from(refill_interval.as_millis())
            .ok()
            .filter(|ms| *ms <= MAX_REFILL_INTERVAL_MS)
            .ok_or_else(|| {
                LimitError::InvalidConfiguration(format!(
                    "refill interval {refill_interval:?} exceeds {MAX_REFILL_INTERVAL_MS}ms"
                ))
            })?;
        if refill_interval_ms == 0 {
            return Err(LimitError::InvalidConfiguration(format!(
                "refill interval must be at least 1ms, got {refill_interval:?}"
            )));
        }

        let token_limit = NonZeroUsize::new(token_limit).ok_or_else(|| {
            LimitError::InvalidConfiguration("token limit must be non-zero".to_string())
        })?;
        if token_limit.get() > MAX_TOKEN_LIMIT {
            return Err(LimitError::InvalidConfiguration(format!(
                "token limit {token_limit} exceeds {MAX_TOKEN_LIMIT}"
            )));
        }

        Ok(Self {
            refill_interval_ms,
            token_limit,
        })
    }

    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }

    pub fn token_limit(&self) -> usize {
        self.token_limit.get()
    }

    pub(crate) fn refill_interval_ms(&self) -> u64 {
        self.refill_interval_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_accepts_positive_values() {
        let config = BucketConfig::new(Duration::from_secs(2), 2).unwrap();
        assert_eq!(config.refill_interval(), Duration::from_millis(2000));
        assert_eq!(config.token_limit(), 2);
    }

    #[test]
    fn it_rejects_a_zero_token_limit() {
        assert!(matches!(
            BucketConfig::new(Duration::from_secs(1), 0),
            Err(LimitError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn it_rejects_a_zero_interval() {
        assert!(matches!(
            BucketConfig::new(Duration::ZERO, 10),
            Err(LimitError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn it_rejects_a_sub_millisecond_interval() {
        assert!(matches!(
            BucketConfig::new(Duration::from_micros(999), 10),
            Err(LimitError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn it_truncates_to_whole_milliseconds() {
        let config = BucketConfig::new(Duration::from_micros(1_500), 1).unwrap();
        assert_eq!(config.refill_interval(), Duration::from_millis(1));
    }

    #[test]
    fn it_rejects_values_beyond_the_packed_range() {
        assert!(matches!(
            BucketConfig::new(Duration::from_secs(1), MAX_TOKEN_LIMIT + 1),
            Err(LimitError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            BucketConfig::new(Duration::from_millis(MAX_REFILL_INTERVAL_MS + 1), 1),
            Err(LimitError::InvalidConfiguration(_))
        ));
        assert!(
            BucketConfig::new(Duration::from_millis(MAX_REFILL_INTERVAL_MS), MAX_TOKEN_LIMIT)
                .is_ok()
        );
    }
}
