//! Idle backoff for the worker claim loop.

use std::time::Duration;

use rand::Rng;

/// Shortest idle sleep between claim attempts.
pub const MIN_IDLE_BACKOFF: Duration = Duration::from_secs(1);

/// Longest idle sleep between claim attempts.
pub const MAX_IDLE_BACKOFF: Duration = Duration::from_secs(30);

/// Bounded exponential backoff with jitter.
///
/// `consecutive_idle` is how many claim attempts in a row found no
/// work. The result doubles per idle round from [`MIN_IDLE_BACKOFF`]
/// up to [`MAX_IDLE_BACKOFF`], then gets up to 25% random jitter so a
/// fleet of idle workers does not poll the job table in lockstep.
pub fn idle_backoff(consecutive_idle: u32) -> Duration {
    let exp = consecutive_idle.min(16);
    let base = MIN_IDLE_BACKOFF
        .saturating_mul(1u32 << exp.min(5))
        .min(MAX_IDLE_BACKOFF);

    let jitter_max = base.as_millis() as u64 / 4;
    let jitter = if jitter_max == 0 {
        0
    } else {
        rand::rng().random_range(0..=jitter_max)
    };
    base + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_idle_round_is_short() {
        let d = idle_backoff(0);
        assert!(d >= MIN_IDLE_BACKOFF);
        assert!(d <= MIN_IDLE_BACKOFF + MIN_IDLE_BACKOFF / 4);
    }

    #[test]
    fn backoff_grows_with_idle_rounds() {
        // Compare lower bounds, ignoring jitter.
        let early = idle_backoff(1);
        let late = idle_backoff(5);
        assert!(late >= early);
    }

    #[test]
    fn backoff_is_capped() {
        for round in [6, 10, 100, u32::MAX] {
            let d = idle_backoff(round);
            assert!(d <= MAX_IDLE_BACKOFF + MAX_IDLE_BACKOFF / 4, "{d:?}");
        }
    }
}
