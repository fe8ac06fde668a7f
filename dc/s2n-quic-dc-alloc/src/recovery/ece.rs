// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Alpha estimation from acknowledged bytes carrying an ECN echo

use crate::alpha::Estimator;
use tracing::trace;

/// Accumulates acked and ECE-acked bytes and folds their ratio into alpha roughly
/// once per window of data.
///
/// An update happens when an ack passes `update_seq`, after which the barrier moves
/// to the highest sequence sent so far.
#[derive(Clone, Copy, Debug)]
pub struct AlphaTracker {
    estimator: Estimator,
    acked_bytes: u64,
    ece_bytes: u64,
    update_seq: u64,
}

impl AlphaTracker {
    /// Alpha starts at 1 so the first congestion signal causes a full cut
    pub const INITIAL_ALPHA: f64 = 1.0;

    #[inline]
    pub fn new(gain: f64) -> Self {
        Self::with_initial_alpha(Self::INITIAL_ALPHA, gain)
    }

    #[inline]
    pub fn with_initial_alpha(alpha: f64, gain: f64) -> Self {
        Self {
            estimator: Estimator::new(alpha, gain),
            acked_bytes: 0,
            ece_bytes: 0,
            update_seq: 0,
        }
    }

    #[inline]
    pub fn alpha(&self) -> f64 {
        self.estimator.alpha()
    }

    #[inline]
    pub fn update_seq(&self) -> u64 {
        self.update_seq
    }

    /// Records `acked_bytes` newly acknowledged up to `ack_seq` and returns the new alpha
    /// if the update barrier was passed
    #[inline]
    pub fn on_ack(
        &mut self,
        acked_bytes: u64,
        ece: bool,
        ack_seq: u64,
        highest_sent: u64,
    ) -> Option<f64> {
        self.acked_bytes += acked_bytes;
        if ece {
            self.ece_bytes += acked_bytes;
        }

        if ack_seq <= self.update_seq {
            return None;
        }

        let ratio = self.ece_bytes as f64 / self.acked_bytes.max(1) as f64;
        let alpha = self.estimator.update(ratio);
        trace!(ratio, alpha, ack_seq, next_update = highest_sent, "alpha update");

        self.acked_bytes = 0;
        self.ece_bytes = 0;
        self.update_seq = highest_sent;

        Some(alpha)
    }

    /// Moves the update barrier, e.g. after a retransmission timeout rewinds the sender
    #[inline]
    pub fn reset_barrier(&mut self, seq: u64) {
        self.update_seq = seq;
    }
}
