use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::DayBoundary;

/// Failures within one calendar day before a shared credential is benched.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Circuit-breaker bookkeeping carried on every shared credential row.
///
/// ```text
/// HEALTHY --failure, count < threshold--> HEALTHY (count + 1)
/// HEALTHY --failure, count reaches threshold--> TRIPPED (until end of day)
/// TRIPPED --selected after the cool-down--> HEALTHY (count 0)
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedBreaker {
    pub failure_count: i32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub disabled_until: Option<DateTime<Utc>>,
}

/// Observable state of a breaker at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Healthy,
    Tripped { until: DateTime<Utc> },
}

/// Result of reporting an upstream failure against a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailureOutcome {
    /// Unknown credential, or one that is not in the shared pool.
    Ignored,
    /// Counted; still eligible for the shared pool.
    Counted { count: i32 },
    /// Counted and benched until `until`.
    Tripped { count: i32, until: DateTime<Utc> },
    /// Bookkeeping could not be persisted; the failure was dropped.
    Unrecorded,
}

impl SharedBreaker {
    /// Benched credentials stay ineligible up to and including `disabled_until`.
    pub fn is_tripped(&self, now: DateTime<Utc>) -> bool {
        matches!(self.disabled_until, Some(until) if until >= now)
    }

    pub fn state(&self, now: DateTime<Utc>) -> BreakerState {
        match self.disabled_until {
            Some(until) if until >= now => BreakerState::Tripped { until },
            _ => BreakerState::Healthy,
        }
    }

    /// Count a failure at `now`. The counter only spans one calendar day.
    pub fn record_failure(
        &mut self,
        now: DateTime<Utc>,
        threshold: u32,
        day: &DayBoundary,
    ) -> FailureOutcome {
        let same_day = self
            .last_failure_at
            .map(|last| day.same_day(last, now))
            .unwrap_or(false);

        self.failure_count = if same_day {
            self.failure_count.saturating_add(1)
        } else {
            1
        };
        self.last_failure_at = Some(now);

        if i64::from(self.failure_count) >= i64::from(threshold) {
            let until = day.end_of_day(now);
            self.disabled_until = Some(until);
            FailureOutcome::Tripped {
                count: self.failure_count,
                until,
            }
        } else {
            FailureOutcome::Counted {
                count: self.failure_count,
            }
        }
    }

    /// Close an expired breaker. Returns `true` if anything was reset.
    pub fn try_heal(&mut self, now: DateTime<Utc>) -> bool {
        match self.disabled_until {
            Some(until) if until < now => {
                self.disabled_until = None;
                self.failure_count = 0;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_three_failures_trip_until_end_of_day() {
        let day = DayBoundary::utc();
        let mut b = SharedBreaker::default();
        let now = morning();

        assert_eq!(b.record_failure(now, 3, &day), FailureOutcome::Counted { count: 1 });
        assert_eq!(b.record_failure(now, 3, &day), FailureOutcome::Counted { count: 2 });
        let out = b.record_failure(now + Duration::hours(1), 3, &day);

        let eod = day.end_of_day(now);
        assert_eq!(out, FailureOutcome::Tripped { count: 3, until: eod });
        assert_eq!(b.disabled_until, Some(eod));
        assert_eq!(b.state(now), BreakerState::Tripped { until: eod });
    }

    #[test]
    fn test_fourth_failure_keeps_same_deadline() {
        let day = DayBoundary::utc();
        let mut b = SharedBreaker::default();
        for _ in 0..3 {
            b.record_failure(morning(), 3, &day);
        }
        let first = b.disabled_until;
        b.record_failure(morning() + Duration::hours(5), 3, &day);
        assert_eq!(b.disabled_until, first);
        assert_eq!(b.failure_count, 4);
    }

    #[test]
    fn test_new_day_restarts_count() {
        let day = DayBoundary::utc();
        let mut b = SharedBreaker::default();
        for _ in 0..3 {
            b.record_failure(morning(), 3, &day);
        }
        let out = b.record_failure(morning() + Duration::days(1), 3, &day);
        assert_eq!(out, FailureOutcome::Counted { count: 1 });
    }

    #[test]
    fn test_heal_only_after_deadline() {
        let day = DayBoundary::utc();
        let mut b = SharedBreaker::default();
        for _ in 0..3 {
            b.record_failure(morning(), 3, &day);
        }
        assert!(!b.try_heal(morning() + Duration::hours(2)));
        assert!(b.is_tripped(morning() + Duration::hours(2)));

        let tomorrow = morning() + Duration::days(1);
        assert!(!b.is_tripped(tomorrow));
        assert!(b.try_heal(tomorrow));
        assert_eq!(b.failure_count, 0);
        assert_eq!(b.disabled_until, None);
        assert_eq!(b.state(tomorrow), BreakerState::Healthy);
    }

    #[test]
    fn test_healthy_breaker_does_not_heal() {
        let mut b = SharedBreaker {
            failure_count: 2,
            last_failure_at: Some(morning()),
            disabled_until: None,
        };
        assert!(!b.try_heal(morning()));
        assert_eq!(b.failure_count, 2);
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let json = serde_json::to_value(FailureOutcome::Counted { count: 2 }).unwrap();
        assert_eq!(json["outcome"], "counted");
        assert_eq!(json["count"], 2);
    }
}
