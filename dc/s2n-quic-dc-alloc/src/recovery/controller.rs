// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    recovery::{ece::AlphaTracker, Ack, Config, RttEstimator, WindowController},
    time::Timestamp,
};
use tracing::debug;

/// Number of duplicate acks that signal a lost segment
const DUPLICATE_ACK_THRESHOLD: u32 = 3;

//  +------------+   cwnd >= ssthresh   +--------------+
//  | Slow Start |--------------------->|  Congestion  |
//  +------------+                      |  Avoidance   |
//     ^     |                          +--------------+
//     |     | ECE / 3 dup acks          |    ^
//     |     v                           v    | ack > recover
//     |  +------------------------------------------+
//     |  | CongestionWindowReduced / Recovery       |
//     |  +------------------------------------------+
//     |
//     | new ack
//  +------+
//  | Loss |<---- retransmission timeout (from any state)
//  +------+
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    SlowStart,
    CongestionAvoidance,
    /// The window was cut in response to an ECN echo; further echoes are ignored until
    /// an ack passes `recover`
    CongestionWindowReduced { recover: u64 },
    /// Fast recovery after duplicate acks; exits once an ack passes `recover`
    Recovery { recover: u64 },
    /// Entered on a retransmission timeout
    Loss,
}

/// The window after an ECN-triggered cut
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reduction {
    pub congestion_window: f64,
    pub slow_start_threshold: f64,
}

/// Inputs a [`Variant`] may use when cutting or growing the window
#[derive(Clone, Copy, Debug)]
pub struct Context<'a> {
    pub congestion_window: f64,
    pub bytes_in_flight: u64,
    pub segment_size: u32,
    pub alpha: f64,
    /// Bytes of new data sent so far
    pub bytes_sent: u64,
    pub rtt_estimator: &'a RttEstimator,
    pub now: Timestamp,
}

impl Context<'_> {
    #[inline]
    pub fn segment_size(&self) -> f64 {
        self.segment_size as f64
    }
}

/// The algorithm-specific part of a window controller
pub trait Variant {
    /// Returns the window after an ECN echo
    fn reduce(&mut self, context: &Context) -> Reduction;

    /// Scales the congestion avoidance increase of one segment per round trip
    #[inline]
    fn increase_factor(&self, context: &Context) -> f64 {
        let _ = context;
        1.0
    }
}

#[derive(Clone, Debug)]
pub struct Controller<V: Variant> {
    variant: V,
    config: Config,
    congestion_window: f64,
    slow_start_threshold: f64,
    state: State,
    alpha: AlphaTracker,
    bytes_in_flight: u64,
    /// One past the highest sequence sent
    highest_sent: u64,
    /// The highest cumulative ack received
    highest_acked: u64,
    duplicate_acks: u32,
}

impl<V: Variant> Controller<V> {
    pub fn new(variant: V, config: Config) -> Self {
        let segment_size = config.segment_size.max(1);
        let config = Config {
            segment_size,
            ..config
        };

        Self {
            variant,
            congestion_window: config.initial_window.max(1) as f64 * segment_size as f64,
            slow_start_threshold: f64::MAX,
            state: State::SlowStart,
            alpha: AlphaTracker::new(config.gain),
            bytes_in_flight: 0,
            highest_sent: 0,
            highest_acked: 0,
            duplicate_acks: 0,
            config,
        }
    }

    #[inline]
    pub fn variant(&self) -> &V {
        &self.variant
    }

    #[inline]
    pub fn variant_mut(&mut self) -> &mut V {
        &mut self.variant
    }

    #[inline]
    pub fn highest_sent(&self) -> u64 {
        self.highest_sent
    }

    #[inline]
    fn segment_size(&self) -> f64 {
        self.config.segment_size as f64
    }

    #[inline]
    fn context<'a>(&self, rtt_estimator: &'a RttEstimator, now: Timestamp) -> Context<'a> {
        Context {
            congestion_window: self.congestion_window,
            bytes_in_flight: self.bytes_in_flight,
            segment_size: self.config.segment_size,
            alpha: self.alpha.alpha(),
            bytes_sent: self.highest_sent,
            rtt_estimator,
            now,
        }
    }

    /// `max(bytes_in_flight / 2, 2 * segment)`
    #[inline]
    fn loss_threshold(&self) -> f64 {
        (self.bytes_in_flight as f64 / 2.0).max(2.0 * self.segment_size())
    }

    #[inline]
    fn set_state(&mut self, state: State) {
        if self.state != state {
            debug!(
                prev = ?self.state,
                next = ?state,
                cwnd = self.congestion_window,
                "window state"
            );
            self.state = state;
        }
    }

    fn on_new_ack(
        &mut self,
        ack: Ack,
        acked_bytes: u64,
        rtt_estimator: &RttEstimator,
        now: Timestamp,
    ) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(acked_bytes);
        self.duplicate_acks = 0;

        self.alpha
            .on_ack(acked_bytes, ack.ece, ack.sequence, self.highest_sent);

        // check if this ack ends a reduction or recovery period
        match self.state {
            State::Recovery { recover } if ack.sequence > recover => {
                self.congestion_window = self.slow_start_threshold;
                self.set_state(State::CongestionAvoidance);
            }
            State::CongestionWindowReduced { recover } if ack.sequence > recover => {
                self.resume();
            }
            State::Loss => {
                self.set_state(State::SlowStart);
            }
            _ => {}
        }

        if ack.ece && self.on_ece(rtt_estimator, now) {
            return;
        }

        match self.state {
            State::SlowStart => {
                self.congestion_window += acked_bytes as f64;
                if self.congestion_window >= self.slow_start_threshold {
                    self.set_state(State::CongestionAvoidance);
                }
            }
            State::CongestionAvoidance => {
                let context = self.context(rtt_estimator, now);
                let factor = self.variant.increase_factor(&context).max(0.0);
                let segment_size = self.segment_size();
                self.congestion_window +=
                    factor * segment_size * acked_bytes as f64 / self.congestion_window;
            }
            State::CongestionWindowReduced { .. } | State::Recovery { .. } | State::Loss => {
                // the window is held while a reduction is in progress
            }
        }
    }

    /// Cuts the window once per window of data; returns true if a cut happened
    fn on_ece(&mut self, rtt_estimator: &RttEstimator, now: Timestamp) -> bool {
        if matches!(
            self.state,
            State::CongestionWindowReduced { .. } | State::Recovery { .. } | State::Loss
        ) {
            return false;
        }

        let context = self.context(rtt_estimator, now);
        let Reduction {
            congestion_window,
            slow_start_threshold,
        } = self.variant.reduce(&context);

        let segment_size = self.segment_size();
        self.congestion_window = congestion_window.max(segment_size);
        self.slow_start_threshold = slow_start_threshold.max(segment_size);

        debug!(
            alpha = context.alpha,
            prev = context.congestion_window,
            cwnd = self.congestion_window,
            ssthresh = self.slow_start_threshold,
            "ecn window reduction"
        );

        self.set_state(State::CongestionWindowReduced {
            recover: self.highest_sent,
        });

        true
    }

    fn on_duplicate_ack(&mut self, ack: Ack, rtt_estimator: &RttEstimator, now: Timestamp) {
        if self.bytes_in_flight == 0 {
            return;
        }

        self.duplicate_acks += 1;

        if ack.ece {
            self.on_ece(rtt_estimator, now);
        }

        if self.duplicate_acks != DUPLICATE_ACK_THRESHOLD
            || matches!(self.state, State::Recovery { .. } | State::Loss)
        {
            return;
        }

        self.slow_start_threshold = self.loss_threshold();
        self.congestion_window =
            self.slow_start_threshold + DUPLICATE_ACK_THRESHOLD as f64 * self.segment_size();
        self.set_state(State::Recovery {
            recover: self.highest_sent,
        });
    }

    #[inline]
    fn resume(&mut self) {
        if self.congestion_window < self.slow_start_threshold {
            self.set_state(State::SlowStart);
        } else {
            self.set_state(State::CongestionAvoidance);
        }
    }

    #[inline]
    fn invariants(&self) {
        if cfg!(debug_assertions) {
            assert!(
                self.congestion_window >= self.segment_size(),
                "cwnd ({}) must be at least one segment",
                self.congestion_window
            );
            assert!((0.0..=1.0).contains(&self.alpha.alpha()));
            assert!(self.highest_acked <= self.highest_sent);
        }
    }
}

impl<V: Variant> WindowController for Controller<V> {
    #[inline]
    fn congestion_window(&self) -> u32 {
        self.congestion_window.min(u32::MAX as f64) as u32
    }

    #[inline]
    fn slow_start_threshold(&self) -> u32 {
        self.slow_start_threshold.min(u32::MAX as f64) as u32
    }

    #[inline]
    fn bytes_in_flight(&self) -> u32 {
        self.bytes_in_flight.min(u32::MAX as u64) as u32
    }

    #[inline]
    fn alpha(&self) -> f64 {
        self.alpha.alpha()
    }

    #[inline]
    fn state(&self) -> State {
        self.state
    }

    #[inline]
    fn on_packet_sent(&mut self, sequence: u64, bytes: u32, _now: Timestamp) {
        if bytes == 0 {
            return;
        }

        let end = sequence.saturating_add(bytes as u64);
        self.bytes_in_flight += bytes as u64;
        self.highest_sent = self.highest_sent.max(end);
    }

    fn on_ack(&mut self, ack: Ack, rtt_estimator: &RttEstimator, now: Timestamp) {
        if ack.sequence > self.highest_acked {
            let acked_bytes = ack.sequence - self.highest_acked;
            self.highest_acked = ack.sequence;
            self.highest_sent = self.highest_sent.max(ack.sequence);
            self.on_new_ack(ack, acked_bytes, rtt_estimator, now);
        } else if ack.sequence == self.highest_acked {
            self.on_duplicate_ack(ack, rtt_estimator, now);
        }

        self.invariants();
    }

    fn on_retransmission_timeout(&mut self, _now: Timestamp) {
        self.slow_start_threshold = self.loss_threshold();
        self.congestion_window = self.segment_size();
        // everything outstanding is presumed lost and will be resent from the last ack
        self.bytes_in_flight = 0;
        self.duplicate_acks = 0;
        self.alpha.reset_barrier(self.highest_acked);
        self.set_state(State::Loss);

        self.invariants();
    }
}
