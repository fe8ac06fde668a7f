// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{config::EPSILON, recovery::ece::AlphaTracker};
use tracing::trace;

/// The window a slice flow advertises back to its sender.
///
/// Grows by `weight_scaled` segments per ack and is cut by `alpha / 2` at most once
/// per window of data while congestion is reported.
#[derive(Clone, Copy, Debug)]
pub struct ReceiveWindow {
    alpha: AlphaTracker,
    window: f64,
    segment_size: u32,
    /// The highest cumulative ack seen
    highest_acked: u64,
    /// Acks beyond this sequence may cut the window again
    update_seq: u64,
}

impl ReceiveWindow {
    #[inline]
    pub fn new(segment_size: u32, gain: f64) -> Self {
        let segment_size = segment_size.max(1);
        Self {
            alpha: AlphaTracker::with_initial_alpha(0.0, gain),
            window: segment_size as f64,
            segment_size,
            highest_acked: 0,
            update_seq: 0,
        }
    }

    /// The window in bytes
    #[inline]
    pub fn window(&self) -> u32 {
        self.window.min(u32::MAX as f64) as u32
    }

    #[inline]
    pub fn alpha(&self) -> f64 {
        self.alpha.alpha()
    }

    /// Processes a cumulative ack and returns the new window.
    ///
    /// `highest_sent` is one past the highest byte the flow has sent and
    /// `weight_scaled` is the flow's current granted weight.
    pub fn on_ack(
        &mut self,
        sequence: u64,
        ece: bool,
        highest_sent: u64,
        weight_scaled: f64,
    ) -> u32 {
        let acked_bytes = sequence.saturating_sub(self.highest_acked);
        self.highest_acked = self.highest_acked.max(sequence);

        self.alpha.on_ack(acked_bytes, ece, sequence, highest_sent);

        let segment_size = self.segment_size as f64;
        let alpha = self.alpha.alpha();

        if alpha > EPSILON && sequence > self.update_seq {
            self.update_seq = highest_sent;
            self.window *= 1.0 - alpha / 2.0;
        } else {
            self.window += weight_scaled.max(0.0) * segment_size;
        }

        self.window = self.window.max(segment_size);

        trace!(sequence, ece, alpha, window = self.window, "receive window");

        self.window()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_by_weight_without_congestion() {
        let mut window = ReceiveWindow::new(1000, 0.5);
        assert_eq!(window.window(), 1000);

        assert_eq!(window.on_ack(1000, false, 4000, 2.0), 3000);
        assert_eq!(window.on_ack(2000, false, 4000, 0.5), 3500);
        assert_eq!(window.alpha(), 0.0);
    }

    #[test]
    fn cuts_once_per_window() {
        let mut window = ReceiveWindow::new(1000, 0.5);
        window.on_ack(1000, false, 8000, 9.0);
        assert_eq!(window.window(), 10_000);

        // the marked bytes are folded in once the alpha barrier at 8000 is passed
        assert_eq!(window.on_ack(2000, true, 8000, 1.0), 11_000);
        // alpha = 0.5 * 1000 / 8000
        assert_eq!(window.on_ack(9000, false, 16_000, 1.0), 10_656);
    }

    #[test]
    fn never_below_one_segment() {
        let mut window = ReceiveWindow::new(500, 1.0);
        // alpha jumps to 1 and halves the window on every new window of data
        let mut seq = 0;
        for _ in 0..20 {
            seq += 500;
            window.on_ack(seq, true, seq + 500, 0.0);
        }
        assert_eq!(window.window(), 500);
        assert_eq!(window.alpha(), 1.0);
    }
}
