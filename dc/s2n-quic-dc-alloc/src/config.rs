// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    alpha,
    error::{check_weight, Kind, Result},
    packet::{Objective, TenantId},
    shaper,
    time::Duration,
};
use hashbrown::HashMap;

/// Sums below this magnitude are treated as "no demand"
pub const EPSILON: f64 = 1e-7;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1);
pub const DEFAULT_MIN_RATE: u64 = 1_000;
pub const DEFAULT_MAX_RATE: u64 = 100_000_000_000;
pub const DEFAULT_SEGMENT_SIZE: u32 = 536;
pub const DEFAULT_SIZE_THRESHOLD: u64 = 2048;
pub const DEFAULT_WEIGHT_MAX: f64 = 5e-6;
pub const DEFAULT_WEIGHT_MIN: f64 = 1e-6;
pub const DEFAULT_EVICTION_GRACE: Duration = Duration::from_secs(1);

/// Selects the aggregation path packets are classified into
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Hierarchy {
    /// Division -> Tunnel -> Flow, granting rates through each flow's shaper
    #[default]
    Division,
    /// Slice -> Flow, granting scaled weights to each flow's receive window
    Slice,
}

/// Parameters of the completion-sensitive weight decay
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Decay {
    pub size_threshold: u64,
    pub weight_max: f64,
    pub weight_min: f64,
}

impl Default for Decay {
    fn default() -> Self {
        Self {
            size_threshold: DEFAULT_SIZE_THRESHOLD,
            weight_max: DEFAULT_WEIGHT_MAX,
            weight_min: DEFAULT_WEIGHT_MIN,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    tick_interval: Duration,
    gain: f64,
    bucket_capacity: u64,
    queue_limit: usize,
    initial_rate: u64,
    min_rate: u64,
    max_rate: u64,
    default_weight: f64,
    flow_weight: f64,
    tenant_weights: HashMap<(TenantId, Objective), f64>,
    decay: Decay,
    segment_size: u32,
    eviction_grace: Option<Duration>,
    hierarchy: Hierarchy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            gain: alpha::DEFAULT_GAIN,
            bucket_capacity: shaper::DEFAULT_CAPACITY,
            queue_limit: shaper::DEFAULT_QUEUE_LIMIT,
            initial_rate: shaper::DEFAULT_RATE,
            min_rate: DEFAULT_MIN_RATE,
            max_rate: DEFAULT_MAX_RATE,
            default_weight: 1.0,
            flow_weight: 1.0,
            tenant_weights: HashMap::new(),
            decay: Decay::default(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            eviction_grace: Some(DEFAULT_EVICTION_GRACE),
            hierarchy: Hierarchy::default(),
        }
    }
}

impl Config {
    #[inline]
    pub fn builder() -> Builder {
        Builder::default()
    }

    #[inline]
    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    #[inline]
    pub fn gain(&self) -> f64 {
        self.gain
    }

    #[inline]
    pub fn bucket_capacity(&self) -> u64 {
        self.bucket_capacity
    }

    #[inline]
    pub fn queue_limit(&self) -> usize {
        self.queue_limit
    }

    #[inline]
    pub fn initial_rate(&self) -> u64 {
        self.initial_rate
    }

    #[inline]
    pub fn min_rate(&self) -> u64 {
        self.min_rate
    }

    #[inline]
    pub fn max_rate(&self) -> u64 {
        self.max_rate
    }

    /// Base weight given to every new flow
    #[inline]
    pub fn flow_weight(&self) -> f64 {
        self.flow_weight
    }

    #[inline]
    pub fn decay(&self) -> &Decay {
        &self.decay
    }

    #[inline]
    pub fn segment_size(&self) -> u32 {
        self.segment_size
    }

    #[inline]
    pub fn eviction_grace(&self) -> Option<Duration> {
        self.eviction_grace
    }

    #[inline]
    pub fn hierarchy(&self) -> Hierarchy {
        self.hierarchy
    }

    /// Returns the configured share for the tenant and objective
    #[inline]
    pub fn tenant_weight(&self, tenant: TenantId, objective: Objective) -> f64 {
        self.tenant_weights
            .get(&(tenant, objective))
            .copied()
            .unwrap_or(self.default_weight)
    }

    #[inline]
    pub fn set_tenant_weight(
        &mut self,
        tenant: TenantId,
        objective: Objective,
        weight: f64,
    ) -> Result<()> {
        let weight = check_weight(weight)?;
        self.tenant_weights.insert((tenant, objective), weight);
        Ok(())
    }

    /// Returns a shaper builder using the configured bucket and initial rate
    #[inline]
    pub fn shaper(&self) -> shaper::Builder {
        shaper::Shaper::builder()
            .with_rate(self.initial_rate)
            .with_capacity(self.bucket_capacity)
            .with_queue_limit(self.queue_limit)
    }

    /// Clamps a rate into `[min_rate, max_rate]`
    #[inline]
    pub fn clamp_rate(&self, rate: f64) -> u64 {
        if rate.is_nan() {
            return self.min_rate;
        }
        rate.clamp(self.min_rate as f64, self.max_rate as f64) as u64
    }
}

#[derive(Clone, Debug, Default)]
pub struct Builder {
    config: Config,
    tenant_weights: Vec<(TenantId, Objective, f64)>,
}

impl Builder {
    #[inline]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    /// Sets the smoothing gain `g` used by every alpha estimator
    #[inline]
    pub fn with_gain(mut self, gain: f64) -> Self {
        self.config.gain = gain;
        self
    }

    /// Sets the shaper bucket capacity in bits
    #[inline]
    pub fn with_bucket_capacity(mut self, bits: u64) -> Self {
        self.config.bucket_capacity = bits;
        self
    }

    #[inline]
    pub fn with_queue_limit(mut self, packets: usize) -> Self {
        self.config.queue_limit = packets;
        self
    }

    #[inline]
    pub fn with_initial_rate(mut self, bits_per_second: u64) -> Self {
        self.config.initial_rate = bits_per_second;
        self
    }

    #[inline]
    pub fn with_rate_bounds(mut self, min: u64, max: u64) -> Self {
        self.config.min_rate = min;
        self.config.max_rate = max;
        self
    }

    /// Sets the share used for tenants without an explicit weight
    #[inline]
    pub fn with_default_weight(mut self, weight: f64) -> Self {
        self.config.default_weight = weight;
        self
    }

    #[inline]
    pub fn with_flow_weight(mut self, weight: f64) -> Self {
        self.config.flow_weight = weight;
        self
    }

    #[inline]
    pub fn with_tenant_weight(
        mut self,
        tenant: TenantId,
        objective: Objective,
        weight: f64,
    ) -> Self {
        self.tenant_weights.push((tenant, objective, weight));
        self
    }

    #[inline]
    pub fn with_decay(mut self, decay: Decay) -> Self {
        self.config.decay = decay;
        self
    }

    #[inline]
    pub fn with_segment_size(mut self, bytes: u32) -> Self {
        self.config.segment_size = bytes;
        self
    }

    /// Sets how long a finished flow is kept before eviction; `None` disables eviction
    #[inline]
    pub fn with_eviction_grace(mut self, grace: Option<Duration>) -> Self {
        self.config.eviction_grace = grace;
        self
    }

    #[inline]
    pub fn with_hierarchy(mut self, hierarchy: Hierarchy) -> Self {
        self.config.hierarchy = hierarchy;
        self
    }

    pub fn build(self) -> Result<Config> {
        let Self {
            mut config,
            tenant_weights,
        } = self;

        if config.tick_interval.is_zero() {
            return Err(Kind::InvalidInterval.err());
        }

        if !(config.gain.is_finite() && config.gain > 0.0 && config.gain <= 1.0) {
            return Err(Kind::InvalidGain.err());
        }

        if config.bucket_capacity == 0 || config.queue_limit == 0 {
            return Err(Kind::InvalidBucket.err());
        }

        if config.max_rate == 0 || config.min_rate > config.max_rate {
            return Err(Kind::InvalidRate.err());
        }

        check_weight(config.default_weight)?;
        check_weight(config.flow_weight)?;

        let Decay {
            weight_max,
            weight_min,
            ..
        } = config.decay;
        check_weight(weight_max)?;
        check_weight(weight_min)?;
        if weight_min > weight_max {
            return Err(Kind::InvalidWeightBounds.err());
        }

        if config.segment_size == 0 {
            return Err(Kind::InvalidBucket.err());
        }

        for (tenant, objective, weight) in tenant_weights {
            config.set_tenant_weight(tenant, objective, weight)?;
        }

        Ok(config)
    }
}
