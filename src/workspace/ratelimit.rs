/// Sliding-window rate limiting keyed by request subject
///
/// One counter log per subject (API key id, user id, or client IP), pruned
/// to the last 24 hours. The check is increment-if-below: a hit is recorded
/// only when every window still has room, so no window ever observes more
/// than its threshold. Counters live in process memory; a restart resets
/// the windows (see DESIGN.md for the dropped external counter store).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::workspace::types::PlanLimits;

const MINUTE: i64 = 60;
const HOUR: i64 = 3_600;
const DAY: i64 = 86_400;

/// Thresholds for the three window granularities
#[derive(Debug, Clone, Copy)]
pub struct RateThresholds {
    pub per_minute: i64,
    pub per_hour: i64,
    pub per_day: i64,
}

impl RateThresholds {
    /// Plan-driven thresholds for API-key subjects
    pub fn from_plan(limits: &PlanLimits) -> Self {
        Self {
            per_minute: limits.api_rate_limit_per_minute,
            per_hour: limits.api_rate_limit_per_hour,
            per_day: limits.api_rate_limit_per_day,
        }
    }

    /// Conservative defaults for user/IP subjects without a plan binding
    pub fn fallback() -> Self {
        Self { per_minute: 120, per_hour: 3_000, per_day: 30_000 }
    }
}

#[derive(Debug, Default)]
struct SubjectLog {
    /// Unix-second timestamps of accepted hits, oldest first
    hits: VecDeque<i64>,
}

/// In-process sliding-window accountant
#[derive(Debug, Default)]
pub struct RateLimiter {
    subjects: Mutex<HashMap<String, SubjectLog>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hit for the subject, or fail RATE_LIMITED with retry_after
    pub fn check(&self, subject: &str, thresholds: RateThresholds) -> Result<()> {
        self.check_at(subject, thresholds, chrono::Utc::now().timestamp())
    }

    /// Clock-injected variant used by the check itself and by tests
    pub fn check_at(&self, subject: &str, thresholds: RateThresholds, now: i64) -> Result<()> {
        let mut subjects = self.subjects.lock().expect("rate limiter lock poisoned");
        let log = subjects.entry(subject.to_string()).or_default();

        // Nothing older than the widest window is ever needed again
        while log.hits.front().is_some_and(|&t| t <= now - DAY) {
            log.hits.pop_front();
        }

        let windows = [
            (MINUTE, thresholds.per_minute),
            (HOUR, thresholds.per_hour),
            (DAY, thresholds.per_day),
        ];
        let mut retry_after: Option<u64> = None;
        for (window, threshold) in windows {
            let cutoff = now - window;
            let in_window = log.hits.iter().filter(|&&t| t > cutoff).count() as i64;
            if in_window >= threshold {
                let oldest_in_window = log
                    .hits
                    .iter()
                    .find(|&&t| t > cutoff)
                    .copied()
                    .unwrap_or(now);
                let wait = (oldest_in_window + window - now).max(1) as u64;
                retry_after = Some(retry_after.map_or(wait, |r| r.max(wait)));
            }
        }
        if let Some(retry_after) = retry_after {
            return Err(Error::RateLimited { retry_after });
        }

        log.hits.push_back(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::types::PlanTier;

    fn freemium() -> RateThresholds {
        RateThresholds::from_plan(&PlanLimits::defaults_for(PlanTier::Freemium))
    }

    #[test]
    fn hundred_per_minute_then_429() {
        let limiter = RateLimiter::new();
        let t0 = 1_700_000_000;
        for i in 0..100 {
            limiter.check_at("AKY-A", freemium(), t0 + i % 50).unwrap();
        }
        // The 101st inside the same minute is refused with a retry hint
        match limiter.check_at("AKY-A", freemium(), t0 + 50) {
            Err(Error::RateLimited { retry_after }) => assert!(retry_after >= 1),
            other => panic!("expected rate limit, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn window_slides_open_again() {
        let limiter = RateLimiter::new();
        let t0 = 1_700_000_000;
        for _ in 0..100 {
            limiter.check_at("AKY-A", freemium(), t0).unwrap();
        }
        assert!(limiter.check_at("AKY-A", freemium(), t0 + 30).is_err());
        // One second past the minute boundary the hits at t0 fall out
        limiter.check_at("AKY-A", freemium(), t0 + 61).unwrap();
    }

    #[test]
    fn no_window_ever_exceeds_threshold() {
        let limiter = RateLimiter::new();
        let thresholds = RateThresholds { per_minute: 5, per_hour: 20, per_day: 50 };
        let t0 = 1_700_000_000;
        let mut accepted_total = 0;
        let mut accepted_times = Vec::new();
        for second in 0..7_200 {
            if limiter.check_at("USR-B", thresholds, t0 + second).is_ok() {
                accepted_total += 1;
                accepted_times.push(t0 + second);
            }
        }
        assert!(accepted_total > 0);
        // Replay every accepted hit against every sliding window position
        for &t in &accepted_times {
            let in_minute = accepted_times.iter().filter(|&&x| x > t - 60 && x <= t).count() as i64;
            let in_hour = accepted_times.iter().filter(|&&x| x > t - 3_600 && x <= t).count() as i64;
            assert!(in_minute <= thresholds.per_minute);
            assert!(in_hour <= thresholds.per_hour);
        }
    }

    #[test]
    fn subjects_are_independent() {
        let limiter = RateLimiter::new();
        let thresholds = RateThresholds { per_minute: 1, per_hour: 10, per_day: 10 };
        let t0 = 1_700_000_000;
        limiter.check_at("AKY-A", thresholds, t0).unwrap();
        assert!(limiter.check_at("AKY-A", thresholds, t0).is_err());
        limiter.check_at("AKY-B", thresholds, t0).unwrap();
        limiter.check_at("ip:10.0.0.9", thresholds, t0).unwrap();
    }
}
