//! Spaced-repetition scheduling
//!
//! A pure function from a task's scheduling state and one review to the next
//! interval and due time. Intervals grow geometrically while the learner keeps
//! remembering. Forgetting either starts a short retry loop or, for prompt
//! types that cannot retry, steps the interval back down.

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};

pub const MINUTE_MILLIS: i64 = 60 * 1000;
pub const DAY_MILLIS: i64 = 24 * 60 * MINUTE_MILLIS;

/// How a single review went
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepetitionOutcome {
    Remembered,
    Forgotten,
}

impl RepetitionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepetitionOutcome::Remembered => "remembered",
            RepetitionOutcome::Forgotten => "forgotten",
        }
    }
}

/// Tuning for the scheduler
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Multiplier applied to the demonstrated interval on success
    pub interval_growth_factor: f64,
    /// Smallest interval a successful review can produce; also the first interval
    pub minimum_review_interval_millis: i64,
    /// How soon a forgotten task comes back
    pub retry_delay_millis: i64,
    /// Jitter added per millisecond-of-second of the review timestamp
    pub jitter_millis_per_unit: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_growth_factor: 2.3,
            minimum_review_interval_millis: 5 * DAY_MILLIS,
            retry_delay_millis: 10 * MINUTE_MILLIS,
            jitter_millis_per_unit: 600,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.interval_growth_factor.is_finite() || self.interval_growth_factor <= 1.0 {
            return Err(ConfigError::Invalid(format!(
                "scheduler.interval_growth_factor must be a finite number above 1, got {}",
                self.interval_growth_factor
            )));
        }
        if self.minimum_review_interval_millis <= 0 {
            return Err(ConfigError::Invalid(
                "scheduler.minimum_review_interval_millis must be positive".into(),
            ));
        }
        if self.retry_delay_millis < 0 || self.jitter_millis_per_unit < 0 {
            return Err(ConfigError::Invalid(
                "scheduler delays must not be negative".into(),
            ));
        }
        Ok(())
    }

    /// Upper bound (exclusive) of the jitter added to any due time
    pub fn max_jitter_millis(&self) -> i64 {
        self.jitter_millis_per_unit.saturating_mul(1000)
    }
}

/// A task's scheduling state before a review
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduleState {
    pub interval_millis: i64,
    pub due_timestamp_millis: i64,
    pub last_review_timestamp_millis: Option<i64>,
    pub best_interval_millis: Option<i64>,
    pub needs_retry: bool,
}

/// One review to schedule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Review {
    pub timestamp_millis: i64,
    pub outcome: RepetitionOutcome,
    pub supports_retry: bool,
}

/// Scheduling state after a review
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduleOutcome {
    pub interval_millis: i64,
    pub due_timestamp_millis: i64,
    pub best_interval_millis: Option<i64>,
    pub needs_retry: bool,
}

#[derive(Clone, Debug, Default)]
pub struct SpacedRepetitionScheduler {
    config: SchedulerConfig,
}

impl SpacedRepetitionScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Time the learner actually retained the task: since the last review, or
    /// since it first came due if it has never been reviewed.
    pub fn elapsed_millis(state: &ScheduleState, review_timestamp_millis: i64) -> i64 {
        let since = state
            .last_review_timestamp_millis
            .unwrap_or(state.due_timestamp_millis);
        review_timestamp_millis.saturating_sub(since).max(0)
    }

    /// Next interval for a review outcome
    pub fn next_interval_millis(
        &self,
        current_interval_millis: i64,
        elapsed_millis: i64,
        outcome: RepetitionOutcome,
        supports_retry: bool,
        needs_retry: bool,
    ) -> i64 {
        let growth = self.config.interval_growth_factor;
        let minimum = self.config.minimum_review_interval_millis;
        match outcome {
            RepetitionOutcome::Remembered if needs_retry => {
                // Passing a retry keeps the interval, crediting a long wait before the retry
                let credited = (elapsed_millis as f64 / growth).floor() as i64;
                current_interval_millis.max(credited).max(minimum)
            }
            RepetitionOutcome::Remembered => {
                let grown = (elapsed_millis as f64 * growth).floor() as i64;
                grown.max(minimum)
            }
            RepetitionOutcome::Forgotten if supports_retry => 0,
            RepetitionOutcome::Forgotten => {
                if current_interval_millis < minimum {
                    // Still ramping up to the first real interval
                    current_interval_millis
                } else {
                    let reduced = (current_interval_millis as f64 / growth).floor() as i64;
                    reduced.max(minimum)
                }
            }
        }
    }

    /// Small offset so tasks reviewed together don't come due in lockstep
    pub fn jitter_millis(&self, timestamp_millis: i64) -> i64 {
        timestamp_millis
            .rem_euclid(1000)
            .saturating_mul(self.config.jitter_millis_per_unit)
    }

    pub fn schedule(&self, state: &ScheduleState, review: &Review) -> ScheduleOutcome {
        let elapsed = Self::elapsed_millis(state, review.timestamp_millis);
        let interval_millis = self.next_interval_millis(
            state.interval_millis,
            elapsed,
            review.outcome,
            review.supports_retry,
            state.needs_retry,
        );
        let jitter = self.jitter_millis(review.timestamp_millis);

        match review.outcome {
            RepetitionOutcome::Remembered => ScheduleOutcome {
                interval_millis,
                due_timestamp_millis: review
                    .timestamp_millis
                    .saturating_add(interval_millis)
                    .saturating_add(jitter),
                best_interval_millis: Some(
                    state
                        .best_interval_millis
                        .map_or(interval_millis, |best| best.max(interval_millis)),
                ),
                needs_retry: false,
            },
            RepetitionOutcome::Forgotten => ScheduleOutcome {
                interval_millis,
                due_timestamp_millis: review
                    .timestamp_millis
                    .saturating_add(self.config.retry_delay_millis)
                    .saturating_add(jitter),
                best_interval_millis: if review.supports_retry {
                    None
                } else {
                    state.best_interval_millis
                },
                needs_retry: review.supports_retry,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> SpacedRepetitionScheduler {
        SpacedRepetitionScheduler::default()
    }

    fn minimum() -> i64 {
        SchedulerConfig::default().minimum_review_interval_millis
    }

    fn reviewed_state(interval: i64, last_review: i64) -> ScheduleState {
        ScheduleState {
            interval_millis: interval,
            due_timestamp_millis: last_review + interval,
            last_review_timestamp_millis: Some(last_review),
            best_interval_millis: Some(interval),
            needs_retry: false,
        }
    }

    fn review(timestamp_millis: i64, outcome: RepetitionOutcome, supports_retry: bool) -> Review {
        Review {
            timestamp_millis,
            outcome,
            supports_retry,
        }
    }

    #[test]
    fn test_remembered_on_schedule_grows_by_factor() {
        let s = scheduler();
        for interval in [minimum(), 12 * DAY_MILLIS, 31 * DAY_MILLIS, 480 * DAY_MILLIS] {
            let state = reviewed_state(interval, 0);
            let out = s.schedule(&state, &review(interval, RepetitionOutcome::Remembered, true));
            assert_eq!(out.interval_millis, (interval as f64 * 2.3).floor() as i64);
            assert!(out.interval_millis > interval);
            assert!(!out.needs_retry);
        }
    }

    #[test]
    fn test_remembered_early_never_drops_below_minimum() {
        let s = scheduler();
        let state = reviewed_state(0, 0);
        let out = s.schedule(&state, &review(1000, RepetitionOutcome::Remembered, true));
        assert_eq!(out.interval_millis, minimum());
        assert_eq!(out.due_timestamp_millis, 1000 + minimum());
    }

    #[test]
    fn test_remembered_credits_real_interval() {
        let s = scheduler();
        let scheduled = 12 * DAY_MILLIS;
        let state = reviewed_state(scheduled, 0);
        let out = s.schedule(&state, &review(scheduled * 4, RepetitionOutcome::Remembered, true));
        assert!(out.interval_millis > 31 * DAY_MILLIS);
    }

    #[test]
    fn test_forgotten_with_retry_collapses_interval() {
        let s = scheduler();
        let state = reviewed_state(31 * DAY_MILLIS, 0);
        let at = 31 * DAY_MILLIS;
        let out = s.schedule(&state, &review(at, RepetitionOutcome::Forgotten, true));
        assert_eq!(out.interval_millis, 0);
        assert!(out.needs_retry);
        assert_eq!(out.best_interval_millis, None);
        assert_eq!(out.due_timestamp_millis, at + 10 * MINUTE_MILLIS);
    }

    #[test]
    fn test_forgotten_without_retry_steps_down() {
        let s = scheduler();
        let interval = 31 * DAY_MILLIS;
        let state = reviewed_state(interval, 0);
        let out = s.schedule(&state, &review(interval, RepetitionOutcome::Forgotten, false));
        assert_eq!(out.interval_millis, (interval as f64 / 2.3).floor() as i64);
        assert!(!out.needs_retry);
        assert_eq!(out.best_interval_millis, Some(interval));

        // Just above the minimum, the reduction is clamped
        let state = reviewed_state(minimum() + 1, 0);
        let out = s.schedule(&state, &review(1, RepetitionOutcome::Forgotten, false));
        assert_eq!(out.interval_millis, minimum());
    }

    #[test]
    fn test_forgotten_during_ramp_keeps_interval() {
        let s = scheduler();
        let state = reviewed_state(MINUTE_MILLIS, 0);
        let out = s.schedule(&state, &review(2000, RepetitionOutcome::Forgotten, false));
        assert_eq!(out.interval_millis, MINUTE_MILLIS);
    }

    #[test]
    fn test_retry_pending_remembered_keeps_and_credits() {
        let s = scheduler();
        let mut state = reviewed_state(0, 0);
        state.needs_retry = true;

        // Quick retry: back to the minimum interval
        let out = s.schedule(&state, &review(5 * MINUTE_MILLIS, RepetitionOutcome::Remembered, true));
        assert_eq!(out.interval_millis, minimum());
        assert!(!out.needs_retry);

        // Retried after a long gap: credited with the gap divided by the growth factor
        let gap = 60 * DAY_MILLIS;
        let out = s.schedule(&state, &review(gap, RepetitionOutcome::Remembered, true));
        assert_eq!(out.interval_millis, (gap as f64 / 2.3).floor() as i64);

        // A retained interval above the credit survives
        let mut state = reviewed_state(40 * DAY_MILLIS, 0);
        state.needs_retry = true;
        let out = s.schedule(&state, &review(DAY_MILLIS, RepetitionOutcome::Remembered, true));
        assert_eq!(out.interval_millis, 40 * DAY_MILLIS);
    }

    #[test]
    fn test_jitter_is_bounded_and_deterministic() {
        let s = scheduler();
        for ts in [0, 1, 999, 1000, 123_456_789, -1] {
            let jitter = s.jitter_millis(ts);
            assert!((0..s.config().max_jitter_millis()).contains(&jitter));
            assert_eq!(jitter, s.jitter_millis(ts));
        }
        assert_eq!(s.jitter_millis(1_000), 0);
        assert_eq!(s.jitter_millis(1_001), 600);
    }

    #[test]
    fn test_best_interval_tracks_longest_success() {
        let s = scheduler();
        let mut state = reviewed_state(31 * DAY_MILLIS, 0);
        state.best_interval_millis = Some(100 * DAY_MILLIS);
        let out = s.schedule(&state, &review(DAY_MILLIS, RepetitionOutcome::Remembered, true));
        assert_eq!(out.best_interval_millis, Some(100 * DAY_MILLIS));

        state.best_interval_millis = None;
        let out = s.schedule(&state, &review(DAY_MILLIS, RepetitionOutcome::Remembered, true));
        assert_eq!(out.best_interval_millis, Some(out.interval_millis));
    }

    #[test]
    fn test_elapsed_uses_due_time_before_first_review() {
        let state = ScheduleState {
            interval_millis: 0,
            due_timestamp_millis: 500,
            last_review_timestamp_millis: None,
            best_interval_millis: None,
            needs_retry: false,
        };
        assert_eq!(SpacedRepetitionScheduler::elapsed_millis(&state, 1500), 1000);
        assert_eq!(SpacedRepetitionScheduler::elapsed_millis(&state, 100), 0);
    }

    #[test]
    fn test_config_validation() {
        assert!(SchedulerConfig::default().validate().is_ok());
        let mut config = SchedulerConfig::default();
        config.interval_growth_factor = 1.0;
        assert!(config.validate().is_err());
        config.interval_growth_factor = f64::NAN;
        assert!(config.validate().is_err());
        let mut config = SchedulerConfig::default();
        config.minimum_review_interval_millis = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_extreme_timestamps_saturate() {
        let s = scheduler();
        let rescheduled_to_dawn_of_time = ScheduleState {
            interval_millis: 0,
            due_timestamp_millis: i64::MIN,
            last_review_timestamp_millis: None,
            best_interval_millis: None,
            needs_retry: false,
        };
        let out = s.schedule(
            &rescheduled_to_dawn_of_time,
            &review(1000, RepetitionOutcome::Remembered, true),
        );
        assert_eq!(out.interval_millis, i64::MAX);
        assert_eq!(out.due_timestamp_millis, i64::MAX);

        let out = s.schedule(
            &reviewed_state(minimum(), 0),
            &review(i64::MAX - 10, RepetitionOutcome::Forgotten, true),
        );
        assert_eq!(out.due_timestamp_millis, i64::MAX);
    }
}
