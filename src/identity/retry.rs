use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;

/// Capped exponential backoff with jitter, bounded by attempts and a wall-clock budget.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub budget: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the uniform random term added to each delay.
    pub jitter: Duration,
}

pub trait BackoffPolicy {
    /// Delay before the next try, `attempt` being the number of failures so far (>= 1).
    fn delay_for_attempt(&self, attempt: u32, jitter: Duration) -> Duration;
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            budget: Duration::from_secs(30),
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            jitter: Duration::from_millis(1_000),
        }
    }
}

impl BackoffPolicy for RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32, jitter: Duration) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let exp = self.base_delay.saturating_mul(factor);
        exp.saturating_add(jitter).min(self.max_delay)
    }
}

impl RetryPolicy {
    pub fn sample_jitter(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Time source for the resolution loop. Tests substitute `ManualClock`.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Timestamp written into profile documents.
    fn wall_clock(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant { Instant::now() }

    fn wall_clock(&self) -> DateTime<Utc> { Utc::now() }

    async fn sleep(&self, duration: Duration) { tokio::time::sleep(duration).await }
}

/// Virtual clock: `sleep` returns at once, advances virtual time and records the request.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    wall_origin: DateTime<Utc>,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            wall_origin: Utc::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock() += by;
    }

    pub fn elapsed(&self) -> Duration { *self.elapsed.lock() }

    /// Every wait requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> { self.sleeps.lock().clone() }
}

impl Default for ManualClock {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant { self.origin + self.elapsed() }

    fn wall_clock(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        self.wall_origin + elapsed
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_then_capped() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for_attempt(1, Duration::ZERO), Duration::from_secs(2));
        assert_eq!(p.delay_for_attempt(2, Duration::ZERO), Duration::from_secs(4));
        assert_eq!(p.delay_for_attempt(4, Duration::from_millis(500)), Duration::from_millis(16_500));
        assert_eq!(p.delay_for_attempt(5, Duration::ZERO), Duration::from_secs(30));
        assert_eq!(p.delay_for_attempt(40, Duration::ZERO), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_in_range() {
        let p = RetryPolicy::default();
        for _ in 0..200 {
            assert!(p.sample_jitter() <= Duration::from_millis(1_000));
        }
        let none = RetryPolicy { jitter: Duration::ZERO, ..RetryPolicy::default() };
        assert_eq!(none.sample_jitter(), Duration::ZERO);
    }

    #[tokio::test]
    async fn manual_clock_records_waits() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        clock.sleep(Duration::from_secs(2)).await;
        clock.sleep(Duration::from_secs(4)).await;
        assert_eq!(clock.now() - t0, Duration::from_secs(6));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2), Duration::from_secs(4)]);
    }
}
