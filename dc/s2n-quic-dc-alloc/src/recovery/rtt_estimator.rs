// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Smoothed round trip time, used by deadline-aware controllers to estimate how long
//! the remaining bytes will take to send

use crate::time::Timestamp;
use core::time::Duration;

/// The smoothed RTT assumed before the first sample
pub const DEFAULT_INITIAL_RTT: Duration = Duration::from_millis(333);

/// Samples below this are raised to it
pub const MIN_SAMPLE: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RttEstimator {
    latest: Duration,
    /// Zero until the first sample
    min: Duration,
    smoothed: Duration,
    last_sample: Option<Timestamp>,
}

impl Default for RttEstimator {
    #[inline]
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_RTT)
    }
}

impl RttEstimator {
    #[inline]
    pub fn new(initial_rtt: Duration) -> Self {
        Self {
            latest: Duration::ZERO,
            min: Duration::ZERO,
            smoothed: initial_rtt,
            last_sample: None,
        }
    }

    #[inline]
    pub fn latest_rtt(&self) -> Duration {
        self.latest
    }

    #[inline]
    pub fn min_rtt(&self) -> Duration {
        self.min
    }

    #[inline]
    pub fn smoothed_rtt(&self) -> Duration {
        self.smoothed
    }

    /// The time of the most recent sample
    #[inline]
    pub fn last_sample(&self) -> Option<Timestamp> {
        self.last_sample
    }

    /// Folds a sample in as `smoothed = 7/8 * smoothed + 1/8 * sample`. The first sample
    /// replaces the initial estimate.
    pub fn update_rtt(&mut self, sample: Duration, now: Timestamp) {
        let sample = sample.max(MIN_SAMPLE);
        self.latest = sample;

        if self.last_sample.replace(now).is_none() {
            self.min = sample;
            self.smoothed = sample;
            return;
        }

        self.min = self.min.min(sample);
        self.smoothed = self.smoothed * 7 / 8 + sample / 8;
    }
}
