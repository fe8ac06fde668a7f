// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The flat per-tenant, per-objective aggregate that owns flows directly.
//!
//! Instead of granting rates, a slice pushes a scale to every flow so the flows'
//! scaled weights add up to the slice weight. Each flow turns its scaled weight into
//! a receive window growth factor.

use crate::{
    config::Config,
    division::normalize,
    error::{check_weight, Result},
    flow::Flow,
    packet::{FiveTuple, Objective, Packet, PacketSink, Tag, TenantId},
    shaper::Outcome,
    time::{Duration, Timestamp},
};
use hashbrown::{hash_map::Entry, HashMap};
use tracing::debug;

#[derive(Debug)]
pub struct Slice {
    tenant: TenantId,
    objective: Objective,
    /// The target weight
    weight: f64,
    /// The sum of every slice's weight at the last tick
    total_weight: f64,
    weight_request: f64,
    /// `weight / weight_request`, or 0 without demand
    scale: f64,
    flows: HashMap<FiveTuple, Flow>,
}

impl Slice {
    pub fn new(tenant: TenantId, objective: Objective, weight: f64) -> Result<Self> {
        Ok(Self {
            tenant,
            objective,
            weight: check_weight(weight)?,
            total_weight: 0.0,
            weight_request: 0.0,
            scale: 1.0,
            flows: HashMap::new(),
        })
    }

    /// Returns the flow for `tuple`, creating it on first sight
    pub fn get_or_create_flow(
        &mut self,
        tuple: FiveTuple,
        tag: &Tag,
        config: &Config,
    ) -> Result<&mut Flow> {
        match self.flows.entry(tuple) {
            Entry::Occupied(entry) => {
                let flow = entry.into_mut();
                flow.on_tag(tag)?;
                Ok(flow)
            }
            Entry::Vacant(entry) => {
                let mut flow = Flow::new(tuple, tag, config)?.without_shaper();
                flow.update_scale(self.scale);
                debug!(
                    flow_id = tag.flow_id,
                    tenant = tag.tenant,
                    objective = %tag.objective,
                    tuple = %tuple,
                    size = tag.flow_size,
                    "new slice flow"
                );
                Ok(entry.insert(flow))
            }
        }
    }

    pub fn send<S: PacketSink>(
        &mut self,
        packet: Packet,
        tag: &Tag,
        now: Timestamp,
        config: &Config,
        sink: &mut S,
    ) -> Result<Outcome> {
        let flow = self.get_or_create_flow(packet.tuple, tag, config)?;
        Ok(flow.send(packet, now, sink))
    }

    /// Recomputes the slice scale and pushes each active flow its share of the slice
    /// weight
    pub fn update(&mut self, total_weight: f64, now: Timestamp) {
        self.total_weight = total_weight;

        let mut weight_request = 0.0;
        for flow in self.flows.values_mut() {
            let request = flow.update_request(now);
            if !flow.is_finished(now) {
                weight_request += request;
            }
        }

        self.weight_request = weight_request;
        self.scale = normalize(self.weight, weight_request);

        debug!(
            tenant = self.tenant,
            objective = %self.objective,
            weight = self.weight,
            total_weight,
            request = weight_request,
            scale = self.scale,
            "slice scale"
        );

        for flow in self.flows.values_mut() {
            if flow.is_finished(now) {
                continue;
            }
            flow.update_scale(flow.weight_request() * self.scale);
        }
    }

    /// Routes a cumulative ack for the data sent on `tuple` to its flow and returns the
    /// flow's new receive window
    #[inline]
    pub fn on_ack(&mut self, tuple: &FiveTuple, sequence: u64, ece: bool) -> Option<u32> {
        let flow = self.flows.get_mut(tuple)?;
        Some(flow.on_ack(sequence, ece))
    }

    /// Removes flows that have been finished for at least `grace` and returns their
    /// tuples
    pub fn evict(&mut self, now: Timestamp, grace: Duration) -> Vec<FiveTuple> {
        let mut evicted = Vec::new();

        self.flows.retain(|tuple, flow| {
            if !flow.is_expired(now, grace) {
                return true;
            }

            debug!(
                flow_id = flow.id(),
                sent = flow.sent_bytes(),
                size = flow.flow_size(),
                "evicting slice flow"
            );
            evicted.push(*tuple);
            false
        });

        evicted
    }

    #[inline]
    pub fn flow(&self, tuple: &FiveTuple) -> Option<&Flow> {
        self.flows.get(tuple)
    }

    #[inline]
    pub fn flows(&self) -> impl Iterator<Item = &Flow> {
        self.flows.values()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    #[inline]
    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    #[inline]
    pub fn objective(&self) -> Objective {
        self.objective
    }

    #[inline]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    #[inline]
    pub fn set_weight(&mut self, weight: f64) -> Result<()> {
        self.weight = check_weight(weight)?;
        Ok(())
    }

    #[inline]
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    #[inline]
    pub fn weight_request(&self) -> f64 {
        self.weight_request
    }

    #[inline]
    pub fn scale(&self) -> f64 {
        self.scale
    }
}
