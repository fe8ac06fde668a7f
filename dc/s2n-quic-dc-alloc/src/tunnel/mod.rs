// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Aggregates the flows of one tenant and objective between a pair of endpoints.
//!
//! Each tick a tunnel reports the sum of its flows' requests, receives a normalized
//! weight from its [`Division`](crate::division::Division), adjusts its rate from the
//! congestion it observed, and splits that rate among its flows with the scheduler
//! of its objective.

use crate::{
    alpha::Estimator,
    config::{Config, EPSILON},
    ecn::{EcnRecorder, RecorderKey},
    error::Result,
    flow::Flow,
    packet::{
        DropReason, FiveTuple, FlowId, Objective, Packet, PacketSink, Route, Tag, TenantId,
    },
    shaper::Outcome,
    time::{
        timer::{self, Provider as _},
        Duration, Timestamp,
    },
};
use hashbrown::{hash_map::Entry, HashMap};
use tracing::debug;

#[cfg(test)]
mod tests;

#[derive(Debug)]
pub struct Tunnel {
    tenant: TenantId,
    objective: Objective,
    route: Route,
    flows: HashMap<FlowId, Flow>,
    alpha: Estimator,
    /// The last recorder snapshot carried marked bytes
    congested: bool,
    /// The granted rate in bits per second
    rate: u64,
    /// The normalized weight from the last response pass
    weight: f64,
    weight_request: f64,
    /// Bits per second
    rate_request: f64,
}

impl Tunnel {
    pub fn new(tenant: TenantId, objective: Objective, route: Route, config: &Config) -> Self {
        Self {
            tenant,
            objective,
            route,
            flows: HashMap::new(),
            alpha: Estimator::new(0.0, config.gain()),
            congested: false,
            rate: config.initial_rate(),
            weight: 0.0,
            weight_request: 0.0,
            rate_request: 0.0,
        }
    }

    /// The recorder congestion for this tunnel is reported to
    #[inline]
    pub fn recorder_key(&self) -> RecorderKey {
        RecorderKey::new(self.tenant, self.objective, &self.route)
    }

    /// Returns the flow named by `tag`, creating it on first sight
    pub fn get_or_create_flow(
        &mut self,
        tuple: FiveTuple,
        tag: &Tag,
        now: Timestamp,
        config: &Config,
    ) -> Result<&mut Flow> {
        // a new flow starts with whatever the other flows left unallocated
        let spare = if self.flows.contains_key(&tag.flow_id) {
            0
        } else {
            let granted: u64 = self.flows.values().map(Flow::rate_response).sum();
            self.rate.saturating_sub(granted)
        };

        match self.flows.entry(tag.flow_id) {
            Entry::Occupied(entry) => {
                let flow = entry.into_mut();
                flow.on_tag(tag)?;
                Ok(flow)
            }
            Entry::Vacant(entry) => {
                let mut flow = Flow::new(tuple, tag, config)?;
                flow.set_rate(spare, now);
                debug!(
                    flow_id = tag.flow_id,
                    tenant = tag.tenant,
                    objective = %tag.objective,
                    tuple = %tuple,
                    size = tag.flow_size,
                    "new flow"
                );
                Ok(entry.insert(flow))
            }
        }
    }

    /// Classifies the packet to its flow and forwards it through the flow's shaper
    pub fn send<S: PacketSink>(
        &mut self,
        packet: Packet,
        tag: &Tag,
        now: Timestamp,
        config: &Config,
        sink: &mut S,
    ) -> Result<Outcome> {
        let flow = self.get_or_create_flow(packet.tuple, tag, now, config)?;
        Ok(flow.send(packet, now, sink))
    }

    /// The request pass: folds the recorder snapshot into alpha and sums the requests of
    /// every active flow
    pub fn update_request(&mut self, recorder: &EcnRecorder, now: Timestamp) -> f64 {
        if recorder.total_bytes() > 0 {
            self.alpha.update(recorder.marked_ratio());
        }
        self.congested = recorder.marked_bytes() > 0;

        let mut weight_request = 0.0;
        let mut rate_request = 0.0;

        for flow in self.flows.values_mut() {
            flow.update_request(now);
            if flow.is_finished(now) {
                continue;
            }
            weight_request += flow.weight_request();
            rate_request += flow.rate_request();
        }

        self.weight_request = weight_request;
        self.rate_request = rate_request;

        weight_request
    }

    /// The response pass: applies the normalized weight, updates the tunnel rate and
    /// splits it among the flows
    pub fn on_response(&mut self, weight: f64, config: &Config, now: Timestamp) {
        self.weight = weight.max(0.0);

        let rate = self.rate as f64;
        let next = if self.congested {
            rate * (1.0 - self.alpha.alpha() * self.weight)
        } else {
            rate * (1.0 + self.weight)
        };

        let prev = self.rate;
        self.rate = config.clamp_rate(next);
        self.congested = false;

        debug!(
            tenant = self.tenant,
            objective = %self.objective,
            src = %self.route.src,
            dst = %self.route.dst,
            weight = self.weight,
            alpha = self.alpha.alpha(),
            prev,
            rate = self.rate,
            "tunnel rate"
        );

        self.schedule(self.rate, now);
    }

    /// Splits `rate` among the flows so the grants never sum to more than `rate`
    pub fn schedule(&mut self, rate: u64, now: Timestamp) {
        let mut requests = Vec::with_capacity(self.flows.len());

        for (id, flow) in self.flows.iter_mut() {
            if flow.is_finished(now) {
                flow.set_rate(0, now);
                continue;
            }

            let request = match self.objective {
                Objective::LatencySensitive => 1.0,
                Objective::CompletionSensitive => flow.weight_request(),
                Objective::DeadlineSensitive => flow.rate_request(),
            };
            requests.push((*id, request));
        }

        let grants = match self.objective {
            Objective::LatencySensitive => equal_split(rate, &requests),
            Objective::CompletionSensitive => weighted_split(rate, &requests),
            Objective::DeadlineSensitive => deadline_first(rate, &mut requests),
        };

        for (id, grant) in grants {
            if let Some(flow) = self.flows.get_mut(&id) {
                flow.set_rate(grant, now);
            }
        }
    }

    /// Releases queued packets whose tokens became available
    pub fn on_timeout<S: PacketSink>(&mut self, now: Timestamp, sink: &mut S) -> usize {
        self.flows
            .values_mut()
            .filter(|flow| flow.next_expiration().is_some_and(|t| t.has_elapsed(now)))
            .map(|flow| flow.on_timeout(now, sink))
            .sum()
    }

    /// Removes flows that have been finished for at least `grace`, dropping anything
    /// they still had queued
    pub fn evict<S: PacketSink>(
        &mut self,
        now: Timestamp,
        grace: Duration,
        sink: &mut S,
    ) -> usize {
        let before = self.flows.len();

        self.flows.retain(|id, flow| {
            if !flow.is_expired(now, grace) {
                return true;
            }

            let dropped = flow.drain(DropReason::Evicted, sink);
            debug!(
                flow_id = *id,
                sent = flow.sent_bytes(),
                size = flow.flow_size(),
                dropped,
                "evicting flow"
            );
            false
        });

        before - self.flows.len()
    }

    #[inline]
    pub fn flow(&self, id: FlowId) -> Option<&Flow> {
        self.flows.get(&id)
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
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// The granted rate in bits per second
    #[inline]
    pub fn rate(&self) -> u64 {
        self.rate
    }

    #[inline]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    #[inline]
    pub fn weight_request(&self) -> f64 {
        self.weight_request
    }

    #[inline]
    pub fn rate_request(&self) -> f64 {
        self.rate_request
    }

    #[inline]
    pub fn alpha(&self) -> f64 {
        self.alpha.alpha()
    }
}

impl timer::Provider for Tunnel {
    #[inline]
    fn next_expiration(&self) -> Option<Timestamp> {
        self.flows.values().fold(None, |earliest, flow| {
            timer::earliest(earliest, flow.next_expiration())
        })
    }
}

/// The same share for every flow
fn equal_split(rate: u64, requests: &[(FlowId, f64)]) -> Vec<(FlowId, u64)> {
    if requests.is_empty() {
        return Vec::new();
    }

    let share = rate / requests.len() as u64;
    requests.iter().map(|(id, _)| (*id, share)).collect()
}

/// Shares in proportion to each request; an even split if the requests sum to ~0
fn weighted_split(rate: u64, requests: &[(FlowId, f64)]) -> Vec<(FlowId, u64)> {
    let total: f64 = requests.iter().map(|(_, weight)| weight.max(0.0)).sum();

    if total < EPSILON {
        return equal_split(rate, requests);
    }

    requests
        .iter()
        .map(|(id, weight)| {
            let share = rate as f64 * weight.max(0.0) / total;
            (*id, (share as u64).min(rate))
        })
        .collect()
}

/// Grants every request in full when the rate covers them all, scaling them up to
/// use the whole rate. Otherwise walks the requests from smallest to largest, giving
/// each what it asks for until the rate runs out.
fn deadline_first(rate: u64, requests: &mut [(FlowId, f64)]) -> Vec<(FlowId, u64)> {
    let total: f64 = requests.iter().map(|(_, request)| request.max(0.0)).sum();

    if total < EPSILON {
        return equal_split(rate, requests);
    }

    if rate as f64 >= total {
        let ratio = rate as f64 / total;
        return requests
            .iter()
            .map(|(id, request)| (*id, ((request.max(0.0) * ratio) as u64).min(rate)))
            .collect();
    }

    // ties go to the lower flow id
    requests.sort_unstable_by(|(a_id, a), (b_id, b)| a.total_cmp(b).then(a_id.cmp(b_id)));

    let mut remaining = rate;
    requests
        .iter()
        .map(|(id, request)| {
            let grant = remaining.min(request.max(0.0) as u64);
            remaining -= grant;
            (*id, grant)
        })
        .collect()
}
