//! Retry policy, per-call retry state and server retry hints.

use std::time::Duration;

use tokio::time::Instant;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Millisecond-precision retry hint. Takes priority over `Retry-After`.
pub const RETRY_AFTER_MS_HEADER: &str = "retry-after-ms";

/// Standard retry hint in seconds.
pub const RETRY_AFTER_HEADER: &str = "retry-after";

// ─── RetryPolicy ─────────────────────────────────────────────────────────────

/// Immutable retry schedule for one logical call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first (1 = no retries).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Growth factor applied per further attempt.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Longest a call can take when every attempt hits `attempt_timeout` and
    /// every wait uses the backoff schedule. Server retry hints can stretch it.
    pub fn worst_case_duration(&self, attempt_timeout: Duration) -> Duration {
        let attempts = self.max_attempts.max(1);
        let mut total = attempt_timeout.saturating_mul(attempts);
        for attempt in 1..attempts {
            total = total.saturating_add(self.backoff_delay(attempt));
        }
        total
    }

    /// Backoff delay after the given failed attempt (1-indexed):
    /// `initial_delay * backoff_multiplier^(attempt-1)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if secs.is_finite() && secs >= 0.0 {
            Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
        } else {
            Duration::MAX
        }
    }
}

// ─── Retry Hints ─────────────────────────────────────────────────────────────

/// Where the next delay came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelaySource {
    MillisecondHint,
    SecondHint,
    Backoff,
}

/// Pick the next delay: ms hint > seconds hint > exponential backoff.
///
/// `header` looks up a lower-cased header name.
pub fn next_delay<'a>(
    policy: &RetryPolicy,
    attempt: u32,
    header: impl Fn(&str) -> Option<&'a str>,
) -> (Duration, DelaySource) {
    if let Some(ms) = header(RETRY_AFTER_MS_HEADER).and_then(parse_millis_hint) {
        return (ms, DelaySource::MillisecondHint);
    }
    if let Some(secs) = header(RETRY_AFTER_HEADER).and_then(parse_seconds_hint) {
        return (secs, DelaySource::SecondHint);
    }
    (policy.backoff_delay(attempt), DelaySource::Backoff)
}

fn parse_millis_hint(raw: &str) -> Option<Duration> {
    let ms: f64 = raw.trim().parse().ok()?;
    Duration::try_from_secs_f64(ms / 1000.0).ok()
}

/// HTTP-date values are not supported and fall through to backoff.
fn parse_seconds_hint(raw: &str) -> Option<Duration> {
    let secs: f64 = raw.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

// ─── PendingCall ─────────────────────────────────────────────────────────────

/// Transient per-call retry state. Never outlives the call.
#[derive(Debug, Clone)]
pub struct PendingCall {
    /// Attempts started so far.
    pub attempt: u32,
    /// Delay scheduled before the next attempt.
    pub next_delay: Duration,
    /// Hard deadline of the attempt in flight.
    pub deadline: Instant,
    attempt_timeout: Duration,
}

impl PendingCall {
    pub fn new(attempt_timeout: Duration) -> Self {
        Self {
            attempt: 0,
            next_delay: Duration::ZERO,
            deadline: Instant::now() + attempt_timeout,
            attempt_timeout,
        }
    }

    /// Start the next attempt and arm its deadline.
    pub fn begin_attempt(&mut self) {
        self.attempt += 1;
        self.deadline = Instant::now() + self.attempt_timeout;
    }

    pub fn has_budget(&self, policy: &RetryPolicy) -> bool {
        self.attempt < policy.max_attempts
    }
}
