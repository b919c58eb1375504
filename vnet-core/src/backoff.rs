//! Bounded exponential backoff for the stream-accept loop, grounded in the reference
//! implementation's `tempDelay` pattern (`kuicx/mux.go`, `kuicx/server.go`): 5ms initial delay,
//! doubling on each consecutive transient failure, capped at 1s, reset to zero on success.

use std::time::Duration;

const INITIAL: Duration = Duration::from_millis(5);
const CAP: Duration = Duration::from_secs(1);

/// Tracks consecutive transient-failure delay for one accept loop.
#[derive(Debug, Default)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    /// Resets the delay to zero; call this after a successful accept.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// The delay to sleep before the next retry, and advances the internal attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        delay_for_attempt(self.attempt)
    }
}

/// `min(5ms * 2^(attempt-1), 1s)` for `attempt >= 1`.
fn delay_for_attempt(attempt: u32) -> Duration {
    let doublings = attempt.saturating_sub(1).min(31);
    INITIAL.checked_mul(1u32 << doublings).filter(|d| *d <= CAP).unwrap_or(CAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_delay_is_initial() {
        assert_eq!(delay_for_attempt(1), Duration::from_millis(5));
    }

    #[test]
    fn delay_doubles_each_attempt() {
        assert_eq!(delay_for_attempt(2), Duration::from_millis(10));
        assert_eq!(delay_for_attempt(3), Duration::from_millis(20));
        assert_eq!(delay_for_attempt(4), Duration::from_millis(40));
    }

    #[test]
    fn delay_is_capped_at_one_second() {
        assert_eq!(delay_for_attempt(20), Duration::from_secs(1));
        assert_eq!(delay_for_attempt(1000), Duration::from_secs(1));
    }

    #[test]
    fn reset_returns_to_initial_delay() {
        let mut backoff = Backoff::new();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(5));
    }
}
