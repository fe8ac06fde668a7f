// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-objective demand functions.
//!
//! Every function is pure over a [`Progress`] snapshot so the three objectives share a
//! single [`Flow`](super::Flow) type.

use crate::{
    config::{Decay, EPSILON},
    packet::Objective,
    time::Timestamp,
};

/// The state a demand function reads
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Progress {
    /// 0 means unbounded
    pub flow_size: u64,
    pub sent_bytes: u64,
    pub deadline: Option<Timestamp>,
    pub weight: f64,
    pub scale: f64,
}

impl Progress {
    #[inline]
    pub fn remaining(&self) -> u64 {
        self.flow_size.saturating_sub(self.sent_bytes)
    }

    /// Seconds left before the deadline, or `None` if there is no deadline or it passed
    #[inline]
    fn time_left(&self, now: Timestamp) -> Option<f64> {
        let deadline = self.deadline?;
        if deadline.has_elapsed(now) {
            return None;
        }
        Some(deadline.saturating_duration_since(now).as_secs_f64())
    }
}

/// Returns the dimensionless weight the flow asks of its aggregate
#[inline]
pub fn weight_request(
    objective: Objective,
    progress: &Progress,
    decay: &Decay,
    now: Timestamp,
) -> f64 {
    let request = match objective {
        Objective::LatencySensitive => progress.weight * progress.scale,
        Objective::DeadlineSensitive => {
            let Some(time_left) = progress.time_left(now) else {
                return 0.0;
            };
            let urgency = progress.remaining() as f64 / time_left.max(EPSILON);
            urgency * progress.weight * progress.scale
        }
        Objective::CompletionSensitive => completion_weight(progress.sent_bytes, decay),
    };

    request.max(0.0)
}

/// `weight_max` below the threshold, then an exponential decay toward `weight_min`
#[inline]
pub fn completion_weight(sent_bytes: u64, decay: &Decay) -> f64 {
    let Decay {
        size_threshold,
        weight_max,
        weight_min,
    } = *decay;

    if sent_bytes < size_threshold {
        return weight_max;
    }

    let exponent = size_threshold as f64 - sent_bytes as f64;
    weight_min + exponent.exp() * (weight_max - weight_min)
}

/// Returns the rate in bits per second the flow needs to meet its goal.
///
/// Only deadline-sensitive flows request a rate; the others are scheduled by weight.
#[inline]
pub fn rate_request(objective: Objective, progress: &Progress, now: Timestamp) -> f64 {
    match objective {
        Objective::DeadlineSensitive => match progress.time_left(now) {
            Some(time_left) => progress.remaining() as f64 * 8.0 / time_left.max(EPSILON),
            None => 0.0,
        },
        Objective::LatencySensitive | Objective::CompletionSensitive => 0.0,
    }
}

#[inline]
pub fn is_finished(objective: Objective, progress: &Progress, now: Timestamp) -> bool {
    let completed = progress.flow_size > 0 && progress.sent_bytes >= progress.flow_size;

    match objective {
        Objective::DeadlineSensitive => {
            completed || progress.deadline.is_some_and(|deadline| deadline.has_elapsed(now))
        }
        Objective::LatencySensitive | Objective::CompletionSensitive => completed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{testing as clock, Duration};

    fn progress(flow_size: u64, sent_bytes: u64, deadline: Option<Timestamp>) -> Progress {
        Progress {
            flow_size,
            sent_bytes,
            deadline,
            weight: 1.0,
            scale: 1.0,
        }
    }

    #[test]
    fn latency_sensitive_demand_is_constant() {
        let now = clock::now();
        let decay = Decay::default();
        let mut p = progress(10_000, 0, None);
        p.scale = 3.0;

        let first = weight_request(Objective::LatencySensitive, &p, &decay, now);
        p.sent_bytes = 9_000;
        let later = weight_request(Objective::LatencySensitive, &p, &decay, now);

        assert_eq!(first, 3.0);
        assert_eq!(first, later);
        assert_eq!(rate_request(Objective::LatencySensitive, &p, now), 0.0);
    }

    #[test]
    fn latency_sensitive_unbounded_never_finishes() {
        let now = clock::now();
        let p = progress(0, u64::MAX, None);
        assert!(!is_finished(Objective::LatencySensitive, &p, now));
        assert!(is_finished(
            Objective::LatencySensitive,
            &progress(100, 100, None),
            now
        ));
    }

    #[test]
    fn deadline_urgency() {
        let now = clock::now();
        let deadline = Some(now + Duration::from_millis(500));
        let p = progress(2_000, 1_000, deadline);

        let weight = weight_request(Objective::DeadlineSensitive, &p, &Decay::default(), now);
        assert!((weight - 2_000.0).abs() < 1e-6);

        let rate = rate_request(Objective::DeadlineSensitive, &p, now);
        assert!((rate - 16_000.0).abs() < 1e-6);
    }

    #[test]
    fn deadline_passed_requests_nothing() {
        let now = clock::now();
        let deadline = Some(now);
        let p = progress(2_000, 0, deadline);
        let later = now + Duration::from_millis(1);

        assert_eq!(
            weight_request(Objective::DeadlineSensitive, &p, &Decay::default(), later),
            0.0
        );
        assert_eq!(rate_request(Objective::DeadlineSensitive, &p, later), 0.0);
    }

    #[test]
    fn deadline_flow_termination() {
        let now = clock::now();

        // completed before the deadline
        let p = progress(1_000, 1_000, Some(now + Duration::from_secs(1)));
        assert!(is_finished(Objective::DeadlineSensitive, &p, now));

        // the deadline passed with data left over
        let p = progress(1_000, 500, Some(now));
        assert!(is_finished(Objective::DeadlineSensitive, &p, now));

        let p = progress(1_000, 500, Some(now + Duration::from_secs(1)));
        assert!(!is_finished(Objective::DeadlineSensitive, &p, now));
    }

    #[test]
    fn completion_weight_decay() {
        let decay = Decay {
            size_threshold: 2048,
            weight_max: 5e-6,
            weight_min: 1e-6,
        };

        assert_eq!(completion_weight(0, &decay), 5e-6);
        assert_eq!(completion_weight(2047, &decay), 5e-6);
        // the decayed branch starts at exactly the maximum
        assert!((completion_weight(2048, &decay) - 5e-6).abs() < 1e-18);

        let mut prev = completion_weight(2048, &decay);
        for sent in [2049, 2050, 2060, 4096, 1_000_000] {
            let weight = completion_weight(sent, &decay);
            assert!(weight <= prev);
            assert!(weight >= 1e-6);
            prev = weight;
        }
        assert_eq!(completion_weight(1_000_000, &decay), 1e-6);
    }

    #[test]
    fn completion_ignores_scale() {
        let now = clock::now();
        let decay = Decay::default();
        let mut p = progress(0, 0, None);
        p.scale = 100.0;
        assert_eq!(
            weight_request(Objective::CompletionSensitive, &p, &decay, now),
            decay.weight_max
        );
    }
}
