// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    recovery::{Config, Context, D2tcpController, Reduction, Variant},
    time::Timestamp,
};

pub const MIN_EXPONENT: f64 = 0.5;
pub const MAX_EXPONENT: f64 = 2.0;

/// Deadline-aware window cut.
///
/// The penalty `p = alpha^d` uses an exponent `d` that grows as the flow falls behind
/// its deadline, so near-deadline flows back off less than far-deadline flows.
#[derive(Clone, Copy, Debug)]
pub struct D2tcp {
    flow_size: u64,
    deadline: Option<Timestamp>,
}

impl D2tcp {
    #[inline]
    pub fn new(flow_size: u64, deadline: Option<Timestamp>) -> Self {
        Self {
            flow_size,
            deadline,
        }
    }

    #[inline]
    pub fn set_deadline(&mut self, deadline: Option<Timestamp>) {
        self.deadline = deadline;
    }

    /// Returns the deadline imminence factor `d`
    pub fn exponent(&self, context: &Context) -> f64 {
        let Some(deadline) = self.deadline else {
            return 1.0;
        };

        let remaining = self.flow_size.saturating_sub(context.bytes_sent);
        if remaining == 0 || deadline.has_elapsed(context.now) {
            return MIN_EXPONENT;
        }

        // time needed to complete at 3/4 of the current window per round trip
        let rtt = context.rtt_estimator.smoothed_rtt().as_secs_f64();
        let needed = remaining as f64 * rtt / (0.75 * context.congestion_window);
        let available = (deadline - context.now).as_secs_f64();

        (needed / available).clamp(MIN_EXPONENT, MAX_EXPONENT)
    }
}

impl Variant for D2tcp {
    fn reduce(&mut self, context: &Context) -> Reduction {
        let d = self.exponent(context);
        let penalty = context.alpha.powf(d);
        let window = (context.congestion_window * (1.0 - penalty / 2.0))
            .max(2.0 * context.segment_size());

        Reduction {
            congestion_window: window,
            slow_start_threshold: window,
        }
    }
}

impl D2tcpController {
    #[inline]
    pub fn d2tcp(flow_size: u64, deadline: Option<Timestamp>, config: Config) -> Self {
        Self::new(D2tcp::new(flow_size, deadline), config)
    }
}
