// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::recovery::{Config, Context, DctcpController, Reduction, Variant};

/// Cuts the window in proportion to the extent of congestion:
/// `cwnd = cwnd * (1 - alpha / 2)`
#[derive(Clone, Copy, Debug, Default)]
pub struct Dctcp;

impl Variant for Dctcp {
    #[inline]
    fn reduce(&mut self, context: &Context) -> Reduction {
        let segment_size = context.segment_size();
        Reduction {
            congestion_window: (context.congestion_window * (1.0 - context.alpha / 2.0))
                .max(segment_size),
            slow_start_threshold: (context.bytes_in_flight as f64 / 2.0).max(2.0 * segment_size),
        }
    }
}

impl DctcpController {
    #[inline]
    pub fn dctcp(config: Config) -> Self {
        Self::new(Dctcp, config)
    }
}
