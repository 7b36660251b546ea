//! Converts successive raw counter samples into cycle-to-date usage.
//!
//! A sample smaller than the previous one is a discontinuity (reboot,
//! interface reset or counter wrap). The segment between the last known
//! value and the reset is unknowable, so it contributes nothing: accounting
//! undercounts on discontinuity and never invents traffic.

use crate::state::AccountingState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub delta: u64,
    pub discontinuity: bool,
    pub accumulated_bytes: u64,
}

/// Folds one raw sample into `state` and returns the updated usage.
pub fn observe(state: &mut AccountingState, raw: u64) -> Observation {
    let discontinuity = raw < state.last_raw;
    let delta = if discontinuity {
        state.carried_bytes = state
            .carried_bytes
            .saturating_add(state.last_raw - state.baseline_raw);
        state.baseline_raw = raw;
        0
    } else {
        raw - state.last_raw
    };

    state.accumulated_bytes = state.accumulated_bytes.saturating_add(delta);
    state.last_raw = raw;

    Observation {
        delta,
        discontinuity,
        accumulated_bytes: state.accumulated_bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn state_at(raw: u64) -> AccountingState {
        let now = Utc.with_ymd_and_hms(2025, 5, 10, 0, 0, 0).unwrap();
        AccountingState::first_run(raw, now)
    }

    #[test]
    fn first_observation_contributes_nothing() {
        let mut state = state_at(1_000);
        let obs = observe(&mut state, 1_000);
        assert_eq!(obs.delta, 0);
        assert!(!obs.discontinuity);
        assert_eq!(state.accumulated_bytes, 0);
    }

    #[test]
    fn increasing_samples_accumulate_deltas() {
        let mut state = state_at(1_000);
        observe(&mut state, 1_500);
        let obs = observe(&mut state, 4_000);
        assert_eq!(obs.delta, 2_500);
        assert_eq!(state.accumulated_bytes, 3_000);
        assert_eq!(state.last_raw, 4_000);
    }

    #[test]
    fn reboot_drop_neither_decreases_nor_inflates_usage() {
        let mut state = state_at(0);
        observe(&mut state, 500 * GIB);
        assert_eq!(state.accumulated_bytes, 500 * GIB);

        // Host reboots: the counter restarts near zero.
        let obs = observe(&mut state, 3 * 1024);
        assert!(obs.discontinuity);
        assert_eq!(obs.delta, 0);
        assert_eq!(state.accumulated_bytes, 500 * GIB);
        assert_eq!(state.baseline_raw, 3 * 1024);

        // Accounting resumes from the new baseline.
        observe(&mut state, GIB + 3 * 1024);
        assert_eq!(state.accumulated_bytes, 501 * GIB);
    }

    #[test]
    fn counter_wrap_is_treated_as_discontinuity() {
        let mut state = state_at(u64::MAX - 10);
        let obs = observe(&mut state, 5);
        assert!(obs.discontinuity);
        assert_eq!(state.accumulated_bytes, 0);
        observe(&mut state, 25);
        assert_eq!(state.accumulated_bytes, 20);
    }

    #[test]
    fn carried_bytes_plus_segment_equals_accumulated() {
        let mut state = state_at(100);
        observe(&mut state, 400);
        observe(&mut state, 10);
        observe(&mut state, 60);
        assert_eq!(state.carried_bytes, 300);
        assert_eq!(
            state.accumulated_bytes,
            state.carried_bytes + (state.last_raw - state.baseline_raw)
        );
    }

    proptest! {
        #[test]
        fn monotone_samples_sum_to_span(start in 0u64..1 << 40, steps in prop::collection::vec(0u64..1 << 30, 0..64)) {
            let mut state = state_at(start);
            let mut raw = start;
            for step in steps {
                raw += step;
                observe(&mut state, raw);
            }
            prop_assert_eq!(state.accumulated_bytes, state.last_raw - state.baseline_raw);
            prop_assert_eq!(state.accumulated_bytes, raw - start);
        }

        #[test]
        fn one_discontinuity_contributes_zero(
            start in 0u64..1 << 40,
            before in prop::collection::vec(1u64..1 << 30, 1..32),
            reset_to in 0u64..1 << 20,
            after in prop::collection::vec(0u64..1 << 30, 0..32),
        ) {
            let mut state = state_at(start);
            let mut raw = start;
            for step in &before {
                raw += step;
                observe(&mut state, raw);
            }
            let used_before = state.accumulated_bytes;
            prop_assume!(reset_to < raw);

            let obs = observe(&mut state, reset_to);
            prop_assert!(obs.discontinuity);
            prop_assert_eq!(state.accumulated_bytes, used_before);

            let mut raw = reset_to;
            for step in &after {
                raw += step;
                let previous = state.accumulated_bytes;
                observe(&mut state, raw);
                prop_assert!(state.accumulated_bytes >= previous);
            }
            prop_assert_eq!(state.accumulated_bytes, used_before + (raw - reset_to));
        }
    }
}
