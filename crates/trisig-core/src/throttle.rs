//! Minimum spacing between repeated collaborator calls.

use std::time::{Duration, Instant};

/// Blocks in [`Throttle::wait`] until at least `interval` has passed since
/// the previous call. Owned by whatever issues the calls.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// How long the next call would have to wait, without waiting.
    pub fn remaining(&self) -> Duration {
        match self.last {
            Some(last) => self.interval.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }

    pub fn wait(&mut self) {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
        self.last = Some(Instant::now());
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_call_is_free() {
        let mut throttle = Throttle::new(Duration::from_secs(60));
        assert_eq!(throttle.remaining(), Duration::ZERO);
        let start = Instant::now();
        throttle.wait();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(throttle.remaining() > Duration::ZERO);
    }

    #[test]
    fn test_spacing_enforced() {
        let mut throttle = Throttle::new(Duration::from_millis(30));
        let start = Instant::now();
        throttle.wait();
        throttle.wait();
        throttle.wait();
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_disabled_never_waits() {
        let mut throttle = Throttle::disabled();
        throttle.wait();
        assert_eq!(throttle.remaining(), Duration::ZERO);
    }
}
