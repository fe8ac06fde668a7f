// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The owner of every registry and of the global allocation tick.
//!
//! Packets enter through [`AllocationContext::send`], received congestion marks through
//! [`AllocationContext::on_packet_received`] and acks through
//! [`AllocationContext::on_ack`]. The driver polls [`timer::Provider::next_expiration`]
//! and calls [`AllocationContext::on_timeout`] once that time is reached.

use crate::{
    config::{Config, Hierarchy},
    division::Division,
    ecn::{self, RecorderKey},
    error::{Kind, Result},
    packet::{Ecn, FiveTuple, Objective, Packet, PacketSink, TenantId},
    shaper::Outcome,
    slice::Slice,
    time::{
        timer::{self, Provider as _},
        Duration, Timer, Timestamp,
    },
};
use hashbrown::{hash_map::Entry, HashMap};
use tracing::{debug, error, trace};


type Key = (TenantId, Objective);

#[derive(Debug)]
pub struct AllocationContext {
    config: Config,
    divisions: HashMap<Key, Division>,
    slices: HashMap<Key, Slice>,
    recorders: ecn::Registry,
    /// The slice owning each slice flow, by the flow's data tuple
    slice_tuples: HashMap<FiveTuple, Key>,
    tick: Tick,
}

#[derive(Debug)]
struct Tick {
    timer: Timer,
    interval: Duration,
    /// `None` keeps the tick running until it is stopped
    stop: Option<Timestamp>,
    count: u64,
}

impl Default for AllocationContext {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl AllocationContext {
    pub fn new(config: Config) -> Self {
        let tick = Tick {
            timer: Timer::default(),
            interval: config.tick_interval(),
            stop: None,
            count: 0,
        };

        Self {
            config,
            divisions: HashMap::new(),
            slices: HashMap::new(),
            recorders: ecn::Registry::default(),
            slice_tuples: HashMap::new(),
            tick,
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Sets the target weight of a tenant's objective, including any aggregate already
    /// serving it
    pub fn set_tenant_weight(
        &mut self,
        tenant: TenantId,
        objective: Objective,
        weight: f64,
    ) -> Result<()> {
        self.config.set_tenant_weight(tenant, objective, weight)?;

        let key = (tenant, objective);
        if let Some(division) = self.divisions.get_mut(&key) {
            division.set_weight(weight)?;
        }
        if let Some(slice) = self.slices.get_mut(&key) {
            slice.set_weight(weight)?;
        }

        Ok(())
    }

    /// Changes the tick interval, taking effect when the next tick is armed
    pub fn set_interval(&mut self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(Kind::InvalidInterval.err());
        }
        self.tick.interval = interval;
        Ok(())
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.tick.interval
    }

    /// Arms the first tick at `at`, ticking until `stop` or forever if `None`.
    ///
    /// If the tick is already running only the stop time changes.
    pub fn start(&mut self, at: Timestamp, stop: Option<Timestamp>) {
        self.tick.stop = stop;

        if self.tick.timer.is_armed() {
            return;
        }

        debug!(%at, ?stop, interval = ?self.tick.interval, "starting allocation tick");
        self.tick.timer.set(at);
    }

    /// Stops ticking after `at`. A tick already armed past `at` is cancelled.
    pub fn stop(&mut self, at: Timestamp) {
        self.tick.stop = Some(at);

        if self.tick.timer.next_expiration().is_some_and(|next| next > at) {
            debug!(%at, "cancelling allocation tick");
            self.tick.timer.cancel();
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.tick.timer.is_armed()
    }

    /// The number of ticks run so far
    #[inline]
    pub fn tick_count(&self) -> u64 {
        self.tick.count
    }

    /// Classifies a tagged packet into its aggregate and flow and forwards it through
    /// the flow
    pub fn send<S: PacketSink>(
        &mut self,
        packet: Packet,
        now: Timestamp,
        sink: &mut S,
    ) -> Result<Outcome> {
        let Some(tag) = packet.tag else {
            error!(
                handle = packet.handle,
                tuple = %packet.tuple,
                "packet is missing its allocation tag"
            );
            return Err(Kind::MissingTag.err());
        };

        if tag.objective == Objective::DeadlineSensitive && tag.deadline.is_none() {
            error!(
                handle = packet.handle,
                flow_id = tag.flow_id,
                tenant = tag.tenant,
                "deadline-sensitive packet is missing its deadline"
            );
            return Err(Kind::MissingDeadline.err());
        }

        let key = (tag.tenant, tag.objective);
        let weight = self.config.tenant_weight(tag.tenant, tag.objective);

        match self.config.hierarchy() {
            Hierarchy::Division => {
                let division = match self.divisions.entry(key) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => {
                        let division = Division::new(tag.tenant, tag.objective, weight)?;
                        debug!(
                            tenant = tag.tenant,
                            objective = %tag.objective,
                            weight,
                            "new division"
                        );
                        entry.insert(division)
                    }
                };

                division.send(packet, &tag, now, &self.config, sink)
            }
            Hierarchy::Slice => {
                let tuple = packet.tuple;

                if self.slice_tuples.get(&tuple).is_some_and(|owner| *owner != key) {
                    return Err(Kind::TagMismatch.err());
                }

                let slice = match self.slices.entry(key) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => {
                        let slice = Slice::new(tag.tenant, tag.objective, weight)?;
                        debug!(
                            tenant = tag.tenant,
                            objective = %tag.objective,
                            weight,
                            "new slice"
                        );
                        entry.insert(slice)
                    }
                };

                let outcome = slice.send(packet, &tag, now, &self.config, sink)?;
                self.slice_tuples.insert(tuple, key);
                Ok(outcome)
            }
        }
    }

    /// Records the ECN codepoint of a packet received at its destination against the
    /// aggregate that sent it
    pub fn on_packet_received(&mut self, packet: &Packet, ecn: Ecn) -> Result<()> {
        let Some(tag) = packet.tag else {
            error!(
                handle = packet.handle,
                tuple = %packet.tuple,
                "received packet is missing its allocation tag"
            );
            return Err(Kind::MissingTag.err());
        };

        let key = RecorderKey::new(tag.tenant, tag.objective, &packet.tuple.route());
        let ce = ecn.congestion_experienced();
        trace!(
            tenant = tag.tenant,
            objective = %tag.objective,
            ce,
            bytes = tag.packet_size,
            "received"
        );
        self.recorders
            .on_packet_received(key, ce, tag.packet_size as u64);

        Ok(())
    }

    /// Routes an ack, received on the reverse of a slice flow's tuple, to that flow.
    /// Returns the flow's new receive window in bytes.
    pub fn on_ack(&mut self, tuple: &FiveTuple, sequence: u64, ece: bool) -> Option<u32> {
        let data = tuple.reversed();
        let key = self.slice_tuples.get(&data)?;
        let window = self.slices.get_mut(key)?.on_ack(&data, sequence, ece)?;
        trace!(tuple = %data, sequence, ece, window, "ack");
        Some(window)
    }

    /// Runs one allocation tick: the request pass over every division, then the
    /// response pass, then the slice scales, then eviction and recorder cleanup
    pub fn update<S: PacketSink>(&mut self, now: Timestamp, sink: &mut S) {
        for division in self.divisions.values_mut() {
            division.update_request(&mut self.recorders, now);
        }

        for division in self.divisions.values_mut() {
            division.update_response(&self.config, now);
        }

        let total_weight: f64 = self.slices.values().map(Slice::weight).sum();
        for slice in self.slices.values_mut() {
            slice.update(total_weight, now);
        }

        self.evict(now, sink);
        self.release_recorders();
    }

    /// Drops every recorder whose route has no tunnel or slice flow left to read it.
    ///
    /// Slice flows take their congestion signal from acks, so the counters of the
    /// recorders they own are cleared each tick.
    fn release_recorders(&mut self) {
        let divisions = &self.divisions;
        let slices = &self.slices;
        self.recorders.retain(|key, recorder| {
            let owner = (key.tenant, key.objective);
            let route = key.route();

            if divisions
                .get(&owner)
                .is_some_and(|division| division.tunnel(&route).is_some())
            {
                return true;
            }

            if slices
                .get(&owner)
                .is_some_and(|slice| slice.flows().any(|flow| flow.route() == route))
            {
                recorder.reset();
                return true;
            }

            trace!(
                tenant = key.tenant,
                objective = %key.objective,
                src = %key.src,
                dst = %key.dst,
                "releasing orphaned recorder"
            );
            false
        });
    }

    /// Removes expired flows and every aggregate left empty. Returns the number of
    /// evicted flows.
    pub fn evict<S: PacketSink>(&mut self, now: Timestamp, sink: &mut S) -> usize {
        let Some(grace) = self.config.eviction_grace() else {
            return 0;
        };

        let mut evicted = 0;
        let recorders = &mut self.recorders;

        self.divisions.retain(|(tenant, objective), division| {
            evicted += division.evict(now, grace, recorders, sink);

            if !division.is_empty() {
                return true;
            }

            debug!(tenant, objective = %objective, "evicting division");
            false
        });

        let slice_tuples = &mut self.slice_tuples;

        self.slices.retain(|(tenant, objective), slice| {
            for tuple in slice.evict(now, grace) {
                evicted += 1;
                slice_tuples.remove(&tuple);

                let route = tuple.route();
                if !slice.flows().any(|flow| flow.route() == route) {
                    recorders.remove(&RecorderKey::new(*tenant, *objective, &route));
                }
            }

            if !slice.is_empty() {
                return true;
            }

            debug!(tenant, objective = %objective, "evicting slice");
            false
        });

        evicted
    }

    /// Runs the tick if it is due and releases every shaper whose tokens are available.
    /// Returns the number of released packets.
    pub fn on_timeout<S: PacketSink>(&mut self, now: Timestamp, sink: &mut S) -> usize {
        if self.tick.timer.poll_expiration(now).is_ready() {
            self.update(now, sink);
            self.tick.count += 1;

            let next = now + self.tick.interval;
            if self.tick.stop.is_none_or(|stop| next <= stop) {
                self.tick.timer.set(next);
            } else {
                debug!(ticks = self.tick.count, "allocation tick stopped");
            }
        }

        self.divisions
            .values_mut()
            .map(|division| division.on_timeout(now, sink))
            .sum()
    }

    #[inline]
    pub fn division(&self, tenant: TenantId, objective: Objective) -> Option<&Division> {
        self.divisions.get(&(tenant, objective))
    }

    #[inline]
    pub fn divisions(&self) -> impl Iterator<Item = &Division> {
        self.divisions.values()
    }

    #[inline]
    pub fn slice(&self, tenant: TenantId, objective: Objective) -> Option<&Slice> {
        self.slices.get(&(tenant, objective))
    }

    #[inline]
    pub fn slices(&self) -> impl Iterator<Item = &Slice> {
        self.slices.values()
    }

    #[inline]
    pub fn recorders(&self) -> &ecn::Registry {
        &self.recorders
    }

    /// The number of flows across every division and slice
    pub fn flow_count(&self) -> usize {
        let divisions: usize = self.divisions.values().map(Division::flow_count).sum();
        let slices: usize = self.slices.values().map(Slice::len).sum();
        divisions + slices
    }
}

impl timer::Provider for AllocationContext {
    #[inline]
    fn next_expiration(&self) -> Option<Timestamp> {
        self.divisions
            .values()
            .fold(self.tick.timer.next_expiration(), |earliest, division| {
                timer::earliest(earliest, division.next_expiration())
            })
    }
}
