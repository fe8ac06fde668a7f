// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::recovery::{Config as RecoveryConfig, Context, L2dctController, Reduction, Variant};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Config {
    pub weight_max: f64,
    pub weight_min: f64,
    /// Segments sent before the weight starts to decay
    pub grace_segments: u64,
    /// Segments over which the weight decays from `weight_max` to `weight_min`
    pub decay_segments: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            weight_max: 2.5,
            weight_min: 0.125,
            grace_segments: 200,
            decay_segments: 1000,
        }
    }
}

/// Size-aware window control: flows that have sent little keep a high weight, which
/// softens their cuts and speeds up their growth
#[derive(Clone, Copy, Debug, Default)]
pub struct L2dct {
    config: Config,
}

impl L2dct {
    #[inline]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Returns the weight `Wc` for a flow that has sent `bytes_sent`
    pub fn weight(&self, bytes_sent: u64, segment_size: u32) -> f64 {
        let Config {
            weight_max,
            weight_min,
            grace_segments,
            decay_segments,
        } = self.config;

        let segments = bytes_sent / segment_size.max(1) as u64;
        let Some(decayed) = segments.checked_sub(grace_segments) else {
            return weight_max;
        };

        let step = (weight_max - weight_min) / decay_segments.max(1) as f64;
        (weight_max - decayed as f64 * step).max(weight_min)
    }
}

impl Variant for L2dct {
    fn reduce(&mut self, context: &Context) -> Reduction {
        let weight = self.weight(context.bytes_sent, context.segment_size);
        let penalty = context.alpha.powf(weight);
        let window = (1.0 - penalty / 2.0) * context.congestion_window;
        let segment_size = context.segment_size();

        Reduction {
            congestion_window: window.max(segment_size),
            slow_start_threshold: window.max(2.0 * segment_size),
        }
    }

    #[inline]
    fn increase_factor(&self, context: &Context) -> f64 {
        if self.config.weight_max <= 0.0 {
            return 1.0;
        }
        self.weight(context.bytes_sent, context.segment_size) / self.config.weight_max
    }
}

impl L2dctController {
    #[inline]
    pub fn l2dct(config: Config, recovery: RecoveryConfig) -> Self {
        Self::new(L2dct::new(config), recovery)
    }
}
