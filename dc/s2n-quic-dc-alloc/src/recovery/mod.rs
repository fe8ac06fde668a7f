// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Transport-side window controllers that translate an ECN congestion signal into a
//! congestion window.
//!
//! The three variants share alpha estimation and the slow start / congestion
//! avoidance / recovery / loss state machine in [`Controller`], and differ only in how
//! they cut the window on an ECN echo and how fast they grow it in congestion
//! avoidance (see [`Variant`]).

use crate::time::Timestamp;

mod controller;
pub mod d2tcp;
pub mod dctcp;
pub mod ece;
pub mod l2dct;
pub mod rtt_estimator;

#[cfg(test)]
mod fuzz_target;

pub use controller::{Context, Controller, Reduction, State, Variant};
pub use rtt_estimator::RttEstimator;

pub type DctcpController = Controller<dctcp::Dctcp>;
pub type D2tcpController = Controller<d2tcp::D2tcp>;
pub type L2dctController = Controller<l2dct::L2dct>;

/// A cumulative acknowledgement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ack {
    /// The next sequence number the receiver expects
    pub sequence: u64,
    /// The receiver echoed a congestion-experienced mark
    pub ece: bool,
}

/// The transport hook shared by every window control algorithm
pub trait WindowController {
    /// The congestion window in bytes
    fn congestion_window(&self) -> u32;

    fn slow_start_threshold(&self) -> u32;

    fn bytes_in_flight(&self) -> u32;

    /// The smoothed fraction of ECN-echoed bytes
    fn alpha(&self) -> f64;

    fn state(&self) -> State;

    /// Records `bytes` sent starting at `sequence`
    fn on_packet_sent(&mut self, sequence: u64, bytes: u32, now: Timestamp);

    /// Processes a cumulative acknowledgement; repeated sequences count as duplicates
    fn on_ack(&mut self, ack: Ack, rtt_estimator: &RttEstimator, now: Timestamp);

    fn on_retransmission_timeout(&mut self, now: Timestamp);
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Config {
    pub segment_size: u32,
    /// The initial window in segments
    pub initial_window: u32,
    /// Gain used for the alpha estimate
    pub gain: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            segment_size: crate::config::DEFAULT_SEGMENT_SIZE,
            initial_window: 10,
            gain: crate::alpha::DEFAULT_GAIN,
        }
    }
}
