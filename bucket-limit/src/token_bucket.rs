use std::ops::ControlFlow;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use quanta::Clock;
use quanta::Instant;

use super::BucketConfig;
use super::LimitError;
use super::Reason;
use super::Strategy;

const TIMESTAMP_BITS: u32 = 44;

/// Mask for the wrapping refill timestamp (milliseconds since bucket creation).
const TIMESTAMP_MASK: u64 = (1 << TIMESTAMP_BITS) - 1;

/// Timestamps are compared relative to each other on a wrapping scale, so the gap
/// between two of them must stay under half the scale to keep its sign.
pub(crate) const MAX_REFILL_INTERVAL_MS: u64 = (1 << (TIMESTAMP_BITS - 1)) - 1;

/// The largest token limit a bucket can be configured with.
///
/// Tokens share a single atomic word with the refill timestamp, and the
/// all-ones pattern is reserved for retired buckets.
pub const MAX_TOKEN_LIMIT: usize = (1 << (u64::BITS - TIMESTAMP_BITS)) - 2;

const RETIRED: u64 = u64::MAX;

fn pack(tokens: u64, last_refill_ms: u64) -> u64 {
    (tokens << TIMESTAMP_BITS) | (last_refill_ms & TIMESTAMP_MASK)
}

fn unpack(state: u64) -> (u64, u64) {
    (state >> TIMESTAMP_BITS, state & TIMESTAMP_MASK)
}

/// Milliseconds from the stored refill timestamp `last` to `now`, or `None` when
/// `last` is ahead of `now` because another caller refilled with a later reading.
///
/// Only the difference is meaningful, so the bucket keeps working once its age
/// outgrows the timestamp field.
fn elapsed_since(last: u64, now: u64) -> Option<u64> {
    let delta = now.wrapping_sub(last) & TIMESTAMP_MASK;
    (delta <= MAX_REFILL_INTERVAL_MS).then_some(delta)
}

/// Outcome of a single admission attempt.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Admission {
    Admitted,
    Rejected { retry_after: Duration },
    /// The bucket was evicted from its registry and must not be used again.
    Retired,
}

impl Admission {
    /// Converts the outcome into the `Strategy` shape.
    ///
    /// `Retired` only arises for buckets a registry has evicted, and the registry
    /// retries those itself. Anything else holding a retired bucket sees it as
    /// permanently overloaded, with nothing to wait for.
    pub(crate) fn into_flow(self) -> ControlFlow<Reason> {
        match self {
            Admission::Admitted => ControlFlow::Continue(()),
            Admission::Rejected { retry_after } => {
                ControlFlow::Break(Reason::Overloaded { retry_after })
            }
            Admission::Retired => ControlFlow::Break(Reason::Overloaded {
                retry_after: Duration::ZERO,
            }),
        }
    }
}

/// A token bucket that snaps back to full once its refill interval has elapsed.
///
/// There is no fractional credit: a depleted bucket stays depleted until strictly
/// more than `refill_interval` has passed since the last refill, at which point the
/// next check restores the full `token_limit` and starts a new interval from that
/// moment. A bucket left idle for many intervals refills exactly once.
///
/// The `(tokens_remaining, last_refill)` pair lives in one `AtomicU64` and every
/// check is a single compare-and-swap, so concurrent callers can never spend the
/// same token twice.
#[derive(Debug)]
pub struct TokenBucket {
    /// Tokens remaining in the high 20 bits, last refill (ms since `anchor`, wrapping)
    /// in the low 44.
    state: AtomicU64,
    token_limit: u64,
    refill_interval_ms: u64,
    clock: Clock,
    anchor: Instant,
}

impl Strategy for TokenBucket {
    fn process(&self) -> ControlFlow<Reason> {
        self.acquire().into_flow()
    }
}

impl TokenBucket {
    /// Creates a full bucket driven by the system monotonic clock.
    ///
    /// # Errors
    ///
    /// Returns [`LimitError::InvalidConfiguration`] for a zero token limit or an
    /// interval shorter than one millisecond. See [`BucketConfig::new`].
    pub fn new(refill_interval: Duration, token_limit: usize) -> Result<Self, LimitError> {
        let config = BucketConfig::new(refill_interval, token_limit)?;
        Ok(Self::with_clock(config, Clock::new()))
    }

    /// Creates a full bucket whose refill timestamps are read from `clock`.
    ///
    /// The bucket's creation instant counts as its first refill.
    pub fn with_clock(config: BucketConfig, clock: Clock) -> Self {
        let anchor = clock.now();
        let token_limit = config.token_limit() as u64;
        Self {
            state: AtomicU64::new(pack(token_limit, 0)),
            token_limit,
            refill_interval_ms: config.refill_interval_ms(),
            clock,
            anchor,
        }
    }

    /// Refills the bucket if it is due, then tries to spend one token.
    pub fn allow(&self) -> bool {
        self.acquire() == Admission::Admitted
    }

    pub fn token_limit(&self) -> usize {
        self.token_limit as usize
    }

    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }

    /// Tokens left as of the last check. A refill that is due but has not yet
    /// been triggered by a check is not reflected.
    pub fn tokens_remaining(&self) -> usize {
        match self.state.load(Ordering::Acquire) {
            RETIRED => 0,
            state => unpack(state).0 as usize,
        }
    }

    /// Time of the last refill, measured from the bucket's creation and wrapping
    /// every 2^44 ms.
    pub fn last_refill(&self) -> Duration {
        match self.state.load(Ordering::Acquire) {
            RETIRED => Duration::ZERO,
            state => Duration::from_millis(unpack(state).1),
        }
    }

    pub(crate) fn acquire(&self) -> Admission {
        let now = self.now_ms();
        let mut current = self.state.load(Ordering::Acquire);

        loop {
            if current == RETIRED {
                return Admission::Retired;
            }

            let (next, admission) = self.transition(current, now);
            // A rejection without a refill leaves the state untouched.
            if next == current {
                return admission;
            }

            match self.state.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return admission,
                Err(actual) => current = actual,
            }
        }
    }

    /// Marks the bucket retired if its refill is due.
    ///
    /// A due bucket behaves exactly like a freshly created one on its next check,
    /// so retiring it and letting the registry build a replacement cannot change
    /// any admission decision.
    pub(crate) fn retire_if_idle(&self) -> bool {
        let now = self.now_ms();
        let mut current = self.state.load(Ordering::Acquire);

        loop {
            if current == RETIRED {
                return true;
            }

            let (_, last) = unpack(current);
            if !self.is_due(last, now) {
                return false;
            }

            match self.state.compare_exchange_weak(
                current,
                RETIRED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn transition(&self, state: u64, now: u64) -> (u64, Admission) {
        let (mut tokens, mut last) = unpack(state);
        debug_assert!(tokens <= self.token_limit);

        if self.is_due(last, now) {
            tokens = self.token_limit;
            last = now & TIMESTAMP_MASK;
        }

        let admission = if tokens > 0 {
            tokens -= 1;
            Admission::Admitted
        } else {
            // Not due, so any elapsed time is at most the interval.
            let wait_ms = match elapsed_since(last, now) {
                Some(elapsed) => self.refill_interval_ms + 1 - elapsed,
                None => self.refill_interval_ms + 1 + (last.wrapping_sub(now) & TIMESTAMP_MASK),
            };
            Admission::Rejected {
                retry_after: Duration::from_millis(wait_ms),
            }
        };

        debug_assert!(tokens <= self.token_limit);
        (pack(tokens, last), admission)
    }

    fn is_due(&self, last: u64, now: u64) -> bool {
        elapsed_since(last, now).is_some_and(|elapsed| elapsed > self.refill_interval_ms)
    }

    fn now_ms(&self) -> u64 {
        self.clock.now().duration_since(self.anchor).as_millis() as u64
    }
}
