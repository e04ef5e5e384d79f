use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Three-state breaker (CLOSED -> OPEN -> HALF_OPEN -> CLOSED|OPEN) built on
/// atomics and a monotonic clock so it can be shared behind an `Arc` without
/// a lock on the hot path. Each provider (weather primary, weather fallback,
/// IP intelligence) owns one instance for the life of the process.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    failure_threshold: u32,
    open_timeout: Duration,
    failures: AtomicU32,
    state: AtomicU32,
    opened_at_millis: AtomicU64,
    epoch: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

const STATE_CLOSED: u32 = 0;
const STATE_OPEN: u32 = 1;
const STATE_HALF_OPEN: u32 = 2;

#[derive(Debug, Clone, serde::Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: String,
    pub failures: u32,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, failure_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            name,
            failure_threshold,
            open_timeout,
            failures: AtomicU32::new(0),
            state: AtomicU32::new(STATE_CLOSED),
            opened_at_millis: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    fn now_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Whether a call is currently allowed. OPEN transitions to HALF_OPEN
    /// (and allows exactly the calling attempt through as the single probe)
    /// once the open timeout has elapsed.
    pub fn allow(&self) -> bool {
        match self.state.load(Ordering::Acquire) {
            STATE_CLOSED => true,
            STATE_HALF_OPEN => true,
            STATE_OPEN => {
                let opened_at = self.opened_at_millis.load(Ordering::Acquire);
                if self.now_millis().saturating_sub(opened_at) >= self.open_timeout.as_millis() as u64
                {
                    // Move to half-open and let this caller act as the probe.
                    let _ = self.state.compare_exchange(
                        STATE_OPEN,
                        STATE_HALF_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    true
                } else {
                    false
                }
            }
            _ => true,
        }
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        self.state.store(STATE_CLOSED, Ordering::Release);
    }

    pub fn record_failure(&self) {
        let state = self.state.load(Ordering::Acquire);
        if state == STATE_HALF_OPEN {
            self.trip();
            return;
        }
        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.failure_threshold {
            self.trip();
        }
    }

    fn trip(&self) {
        self.opened_at_millis.store(self.now_millis(), Ordering::Release);
        self.state.store(STATE_OPEN, Ordering::Release);
    }

    pub fn state(&self) -> BreakerState {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => BreakerState::Open,
            STATE_HALF_OPEN => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    pub fn status(&self) -> BreakerStatus {
        BreakerStatus {
            name: self.name.to_string(),
            state: match self.state() {
                BreakerState::Closed => "CLOSED".to_string(),
                BreakerState::Open => "OPEN".to_string(),
                BreakerState::HalfOpen => "HALF_OPEN".to_string(),
            },
            failures: self.failures.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_threshold_failures() {
        let breaker = CircuitBreaker::new("test", 3, Duration::from_millis(50));
        assert!(breaker.allow());
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allow());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn half_opens_after_timeout_and_recovers_on_success() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_millis(10));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.allow());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn failure_while_half_open_reopens() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_millis(10));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.allow());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }
}
