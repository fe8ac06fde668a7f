// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The per-tenant, per-objective aggregate of tunnels.
//!
//! On every tick a division sums its tunnels' weight requests and scales them so they
//! add up to the division's configured weight.

use crate::{
    config::{Config, EPSILON},
    ecn,
    error::{check_weight, Result},
    packet::{Objective, Packet, PacketSink, Route, Tag, TenantId},
    shaper::Outcome,
    time::{
        timer::{self, Provider},
        Duration, Timestamp,
    },
    tunnel::Tunnel,
};
use hashbrown::HashMap;
use tracing::debug;

#[derive(Debug)]
pub struct Division {
    tenant: TenantId,
    objective: Objective,
    /// The configured share
    weight: f64,
    /// The sum of the tunnels' requests from the last request pass
    weight_request: f64,
    /// `weight / weight_request`, or 0 without demand
    scale: f64,
    tunnels: HashMap<Route, Tunnel>,
}

impl Division {
    pub fn new(tenant: TenantId, objective: Objective, weight: f64) -> Result<Self> {
        Ok(Self {
            tenant,
            objective,
            weight: check_weight(weight)?,
            weight_request: 0.0,
            scale: 0.0,
            tunnels: HashMap::new(),
        })
    }

    /// Forwards the packet through the tunnel for its endpoints, creating the tunnel
    /// and flow as needed
    pub fn send<S: PacketSink>(
        &mut self,
        packet: Packet,
        tag: &Tag,
        now: Timestamp,
        config: &Config,
        sink: &mut S,
    ) -> Result<Outcome> {
        let route = packet.tuple.route();
        let tunnel = self.tunnels.entry(route).or_insert_with(|| {
            debug!(
                tenant = tag.tenant,
                objective = %tag.objective,
                src = %route.src,
                dst = %route.dst,
                "new tunnel"
            );
            Tunnel::new(tag.tenant, tag.objective, route, config)
        });

        tunnel.send(packet, tag, now, config, sink)
    }

    /// The request pass: every tunnel consumes its recorder and reports its demand
    pub fn update_request(&mut self, recorders: &mut ecn::Registry, now: Timestamp) -> f64 {
        let mut weight_request = 0.0;

        for tunnel in self.tunnels.values_mut() {
            let recorder = recorders.take(&tunnel.recorder_key());
            weight_request += tunnel.update_request(&recorder, now);
        }

        self.weight_request = weight_request;
        weight_request
    }

    /// The response pass: normalizes the tunnels' requests against the division weight
    pub fn update_response(&mut self, config: &Config, now: Timestamp) {
        self.scale = normalize(self.weight, self.weight_request);

        debug!(
            tenant = self.tenant,
            objective = %self.objective,
            weight = self.weight,
            request = self.weight_request,
            scale = self.scale,
            "division scale"
        );

        for tunnel in self.tunnels.values_mut() {
            let weight = self.scale * tunnel.weight_request();
            tunnel.on_response(weight, config, now);
        }
    }

    pub fn on_timeout<S: PacketSink>(&mut self, now: Timestamp, sink: &mut S) -> usize {
        self.tunnels
            .values_mut()
            .map(|tunnel| tunnel.on_timeout(now, sink))
            .sum()
    }

    /// Evicts expired flows and then any tunnel left without flows, along with its
    /// recorder. Returns the number of evicted flows.
    pub fn evict<S: PacketSink>(
        &mut self,
        now: Timestamp,
        grace: Duration,
        recorders: &mut ecn::Registry,
        sink: &mut S,
    ) -> usize {
        let mut evicted = 0;

        self.tunnels.retain(|route, tunnel| {
            evicted += tunnel.evict(now, grace, sink);

            if !tunnel.is_empty() {
                return true;
            }

            recorders.remove(&tunnel.recorder_key());
            debug!(src = %route.src, dst = %route.dst, "evicting tunnel");
            false
        });

        evicted
    }

    #[inline]
    pub fn tunnel(&self, route: &Route) -> Option<&Tunnel> {
        self.tunnels.get(route)
    }

    #[inline]
    pub fn tunnels(&self) -> impl Iterator<Item = &Tunnel> {
        self.tunnels.values()
    }

    /// The number of flows across every tunnel
    #[inline]
    pub fn flow_count(&self) -> usize {
        self.tunnels.values().map(Tunnel::len).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
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
    pub fn weight_request(&self) -> f64 {
        self.weight_request
    }

    #[inline]
    pub fn scale(&self) -> f64 {
        self.scale
    }
}

impl Provider for Division {
    #[inline]
    fn next_expiration(&self) -> Option<Timestamp> {
        self.tunnels.values().fold(None, |earliest, tunnel| {
            timer::earliest(earliest, tunnel.next_expiration())
        })
    }
}

/// `target / request`, or 0 if `|request|` is below epsilon
#[inline]
pub(crate) fn normalize(target: f64, request: f64) -> f64 {
    if request.abs() < EPSILON {
        0.0
    } else {
        target / request
    }
}
