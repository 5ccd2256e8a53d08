//! Claim-lease and heartbeat constants and predicates.
//!
//! Leases are the crash-detection mechanism: a worker that dies
//! mid-job simply stops renewing, and the job becomes claimable again
//! once the lease deadline passes.

use std::time::Duration;

use crate::types::Timestamp;

/// Default claim lease duration in seconds. Tunable via configuration;
/// renewal (not lease length) is what keeps long jobs safe.
pub const DEFAULT_LEASE_SECS: u64 = 600;

/// Default maximum job attempts before a job fails permanently.
pub const DEFAULT_MAX_ATTEMPTS: i16 = 3;

/// If a worker has not sent a heartbeat within this many seconds, it is
/// considered offline and its claims become reclaimable immediately.
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 120;

/// How often a busy worker heartbeats and renews its lease.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// How often the stale-job reclaimer sweeps.
pub const RECLAIM_INTERVAL_SECS: u64 = 60;

/// A lease is expired once its deadline is strictly in the past.
/// `None` means unclaimed, which counts as expired for claim purposes.
pub fn lease_expired(claim_expires_at: Option<Timestamp>, now: Timestamp) -> bool {
    match claim_expires_at {
        None => true,
        Some(deadline) => deadline < now,
    }
}

/// Renewal cadence for a given lease duration: half the lease, floored
/// at one second, so a single missed renewal never loses the claim.
pub fn renew_interval(lease: Duration) -> Duration {
    std::cmp::max(lease / 2, Duration::from_secs(1))
}

/// Tick cadence for a busy worker's renew-and-heartbeat task.
///
/// A long lease would push `renew_interval` past the heartbeat timeout
/// and get a perfectly healthy worker marked offline (and its job
/// reclaimed) mid-transcode, so the tick is capped at the heartbeat
/// interval. Renewing the lease more often than strictly needed is
/// harmless.
pub fn busy_tick_interval(lease: Duration) -> Duration {
    std::cmp::min(
        renew_interval(lease),
        Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn unclaimed_counts_as_expired() {
        assert!(lease_expired(None, Utc::now()));
    }

    #[test]
    fn future_deadline_not_expired() {
        let now = Utc::now();
        assert!(!lease_expired(Some(now + chrono::Duration::seconds(30)), now));
    }

    #[test]
    fn past_deadline_expired() {
        let now = Utc::now();
        assert!(lease_expired(Some(now - chrono::Duration::seconds(1)), now));
    }

    #[test]
    fn deadline_exactly_now_not_yet_expired() {
        let now = Utc::now();
        assert!(!lease_expired(Some(now), now));
    }

    #[test]
    fn renew_interval_is_half_lease() {
        assert_eq!(
            renew_interval(Duration::from_secs(600)),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn renew_interval_floored_at_one_second() {
        assert_eq!(renew_interval(Duration::from_secs(1)), Duration::from_secs(1));
    }

    #[test]
    fn heartbeat_interval_beats_timeout() {
        // A healthy worker must heartbeat several times per timeout window.
        assert!(HEARTBEAT_INTERVAL_SECS * 2 <= HEARTBEAT_TIMEOUT_SECS);
    }

    #[test]
    fn busy_tick_stays_inside_offline_timeout() {
        // A worker mid-transcode heartbeats only from its renewal task;
        // that cadence must beat the offline timeout even with room for
        // one missed tick, for any plausible lease length.
        let timeout = Duration::from_secs(HEARTBEAT_TIMEOUT_SECS);
        for lease_secs in [60, DEFAULT_LEASE_SECS, 3_600, 86_400] {
            let tick = busy_tick_interval(Duration::from_secs(lease_secs));
            assert!(tick * 2 <= timeout, "lease {lease_secs}s ticks every {tick:?}");
        }
    }

    #[test]
    fn busy_tick_uses_renewal_cadence_for_short_leases() {
        assert_eq!(
            busy_tick_interval(Duration::from_secs(20)),
            Duration::from_secs(10)
        );
    }
}
