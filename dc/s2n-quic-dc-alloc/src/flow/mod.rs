// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The leaf of the allocation hierarchy.
//!
//! A single [`Flow`] type serves every [`Objective`]; the objective only selects which
//! demand functions in [`objective`] are applied to the flow's progress.

use crate::{
    config::{Config, Decay, EPSILON},
    error::{check_weight, Kind, Result},
    packet::{
        DropReason, FiveTuple, FlowId, Objective, Packet, PacketSink, Route, Tag, TenantId,
    },
    shaper::{Outcome, Shaper},
    time::{
        timer::{self, Provider as _},
        Duration, Timestamp,
    },
};
use tracing::{debug, trace};

pub mod objective;
mod window;


pub use objective::Progress;
pub use window::ReceiveWindow;

#[derive(Debug)]
pub struct Flow {
    id: FlowId,
    tenant: TenantId,
    objective: Objective,
    tuple: FiveTuple,
    /// 0 means unbounded
    flow_size: u64,
    /// Payload bytes handed to the sink
    sent_bytes: u64,
    /// Payload bytes accepted but not yet forwarded or dropped
    buffered_bytes: u64,
    dropped_bytes: u64,
    deadline: Option<Timestamp>,
    segment_size: u32,
    weight: f64,
    /// Pushed down by the enclosing aggregate
    scale: f64,
    weight_scaled: f64,
    weight_request: f64,
    /// Bits per second
    rate_request: f64,
    /// Bits per second granted by the enclosing tunnel
    rate_response: u64,
    decay: Decay,
    /// Paces packets in the rate-granting hierarchy; absent when the flow is
    /// controlled through its receive window instead
    shaper: Option<Shaper>,
    window: ReceiveWindow,
    /// The time the flow was first seen finished
    finished_at: Option<Timestamp>,
}

impl Flow {
    /// Creates a paced flow from the first tag seen on `tuple`
    pub fn new(tuple: FiveTuple, tag: &Tag, config: &Config) -> Result<Self> {
        if tag.objective == Objective::DeadlineSensitive && tag.deadline.is_none() {
            return Err(Kind::MissingDeadline.err());
        }

        let weight = check_weight(config.flow_weight())?;
        let segment_size = config.segment_size();

        Ok(Self {
            id: tag.flow_id,
            tenant: tag.tenant,
            objective: tag.objective,
            tuple,
            flow_size: tag.flow_size,
            sent_bytes: 0,
            buffered_bytes: 0,
            dropped_bytes: 0,
            deadline: tag.deadline,
            segment_size,
            weight,
            scale: 1.0,
            weight_scaled: weight,
            weight_request: 0.0,
            rate_request: 0.0,
            rate_response: config.initial_rate(),
            decay: *config.decay(),
            shaper: Some(config.shaper().build()),
            window: ReceiveWindow::new(segment_size, config.gain()),
            finished_at: None,
        })
    }

    /// Removes the shaper so packets are forwarded as soon as they are sent
    #[inline]
    pub fn without_shaper(mut self) -> Self {
        self.shaper = None;
        self
    }

    /// Applies the tag carried by a later packet of the flow.
    ///
    /// The flow size and deadline may be learned after the first packet; the tenant and
    /// objective may not change.
    pub fn on_tag(&mut self, tag: &Tag) -> Result<()> {
        if tag.tenant != self.tenant || tag.objective != self.objective {
            return Err(Kind::TagMismatch.err());
        }

        if tag.flow_size > self.flow_size {
            self.flow_size = tag.flow_size;
        }

        if tag.deadline.is_some() {
            self.deadline = tag.deadline;
        }

        Ok(())
    }

    /// Accepts a packet and forwards it through the flow's shaper
    pub fn send<S: PacketSink>(
        &mut self,
        packet: Packet,
        now: Timestamp,
        sink: &mut S,
    ) -> Outcome {
        self.buffered_bytes += payload_bytes(&packet);

        let route = self.route();
        let mut sink = Accounting::new(sink);

        let outcome = match self.shaper.as_mut() {
            Some(shaper) => shaper.send(packet, &route, now, &mut sink),
            None => {
                sink.forward(packet, &route);
                Outcome::Forwarded
            }
        };

        self.settle(sink.forwarded, sink.dropped);

        outcome
    }

    /// Releases queued packets whose tokens became available
    pub fn on_timeout<S: PacketSink>(&mut self, now: Timestamp, sink: &mut S) -> usize {
        let Some(shaper) = self.shaper.as_mut() else {
            return 0;
        };

        let route = self.tuple.route();
        let mut sink = Accounting::new(sink);
        let count = shaper.on_timeout(now, &route, &mut sink);
        self.settle(sink.forwarded, sink.dropped);

        count
    }

    /// Drops everything still queued
    pub fn drain<S: PacketSink>(&mut self, reason: DropReason, sink: &mut S) -> usize {
        let Some(shaper) = self.shaper.as_mut() else {
            return 0;
        };

        let mut sink = Accounting::new(sink);
        let count = shaper.drain(reason, &mut sink);
        self.settle(sink.forwarded, sink.dropped);

        count
    }

    /// Recomputes the weight and rate requests from the flow's current progress and
    /// returns the weight request
    pub fn update_request(&mut self, now: Timestamp) -> f64 {
        let progress = self.progress();

        self.weight_request =
            objective::weight_request(self.objective, &progress, &self.decay, now);
        self.rate_request = objective::rate_request(self.objective, &progress, now);

        if objective::is_finished(self.objective, &progress, now) {
            if self.finished_at.is_none() {
                debug!(
                    flow_id = self.id,
                    tenant = self.tenant,
                    objective = %self.objective,
                    sent = self.sent_bytes,
                    size = self.flow_size,
                    "flow finished"
                );
                self.finished_at = Some(now);
            }
        } else {
            self.finished_at = None;
        }

        self.invariants();

        self.weight_request
    }

    /// Applies the rate granted by the enclosing tunnel
    #[inline]
    pub fn set_rate(&mut self, rate: u64, now: Timestamp) {
        trace!(flow_id = self.id, rate, "flow rate");
        self.rate_response = rate;
        if let Some(shaper) = self.shaper.as_mut() {
            shaper.set_rate(rate, now);
        }
    }

    /// Applies a scale pushed down from the enclosing aggregate.
    ///
    /// Values at or below epsilon carry no demand information and are ignored.
    #[inline]
    pub fn update_scale(&mut self, scale: f64) {
        if scale > EPSILON {
            self.scale = scale;
            self.weight_scaled = self.weight * scale;
        }
    }

    /// Processes a cumulative ack for the flow's data and returns the window it
    /// advertises
    #[inline]
    pub fn on_ack(&mut self, sequence: u64, ece: bool) -> u32 {
        self.window
            .on_ack(sequence, ece, self.sent_bytes, self.weight_scaled)
    }

    #[inline]
    pub fn is_finished(&self, now: Timestamp) -> bool {
        objective::is_finished(self.objective, &self.progress(), now)
    }

    /// Returns true once the flow has been finished for at least `grace`
    #[inline]
    pub fn is_expired(&self, now: Timestamp, grace: Duration) -> bool {
        self.finished_at
            .is_some_and(|at| now.saturating_duration_since(at) >= grace)
            && self.is_finished(now)
    }

    #[inline]
    pub fn progress(&self) -> Progress {
        Progress {
            flow_size: self.flow_size,
            sent_bytes: self.sent_bytes,
            deadline: self.deadline,
            weight: self.weight,
            scale: self.scale,
        }
    }

    #[inline]
    pub fn id(&self) -> FlowId {
        self.id
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
    pub fn tuple(&self) -> &FiveTuple {
        &self.tuple
    }

    #[inline]
    pub fn route(&self) -> Route {
        self.tuple.route()
    }

    #[inline]
    pub fn flow_size(&self) -> u64 {
        self.flow_size
    }

    #[inline]
    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes
    }

    #[inline]
    pub fn buffered_bytes(&self) -> u64 {
        self.buffered_bytes
    }

    #[inline]
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    #[inline]
    pub fn deadline(&self) -> Option<Timestamp> {
        self.deadline
    }

    #[inline]
    pub fn segment_size(&self) -> u32 {
        self.segment_size
    }

    #[inline]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    #[inline]
    pub fn set_weight(&mut self, weight: f64) -> Result<()> {
        self.weight = check_weight(weight)?;
        self.weight_scaled = self.weight * self.scale;
        Ok(())
    }

    #[inline]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// `weight * scale`
    #[inline]
    pub fn weight_scaled(&self) -> f64 {
        self.weight_scaled
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
    pub fn rate_response(&self) -> u64 {
        self.rate_response
    }

    /// The smoothed congestion ratio seen on acks
    #[inline]
    pub fn alpha(&self) -> f64 {
        self.window.alpha()
    }

    #[inline]
    pub fn window(&self) -> &ReceiveWindow {
        &self.window
    }

    #[inline]
    pub fn shaper(&self) -> Option<&Shaper> {
        self.shaper.as_ref()
    }

    #[inline]
    fn settle(&mut self, forwarded: u64, dropped: u64) {
        self.buffered_bytes = self.buffered_bytes.saturating_sub(forwarded + dropped);
        self.sent_bytes += forwarded;
        self.dropped_bytes += dropped;
    }

    #[inline]
    fn invariants(&self) {
        if cfg!(debug_assertions) {
            assert!(self.weight >= 0.0, "weight ({}) must not be negative", self.weight);
            assert!(self.weight_request >= 0.0);
            assert!((0.0..=1.0).contains(&self.alpha()));
        }
    }
}

impl timer::Provider for Flow {
    #[inline]
    fn next_expiration(&self) -> Option<Timestamp> {
        self.shaper.next_expiration()
    }
}

/// Payload bytes a packet counts against its flow
#[inline]
fn payload_bytes(packet: &Packet) -> u64 {
    packet.tag.map_or(packet.len, |tag| tag.packet_size) as u64
}

/// Counts the payload that passes through to the wrapped sink
struct Accounting<'a, S: PacketSink> {
    sink: &'a mut S,
    forwarded: u64,
    dropped: u64,
}

impl<'a, S: PacketSink> Accounting<'a, S> {
    #[inline]
    fn new(sink: &'a mut S) -> Self {
        Self {
            sink,
            forwarded: 0,
            dropped: 0,
        }
    }
}

impl<S: PacketSink> PacketSink for Accounting<'_, S> {
    #[inline]
    fn forward(&mut self, packet: Packet, route: &Route) {
        self.forwarded += payload_bytes(&packet);
        self.sink.forward(packet, route);
    }

    #[inline]
    fn on_drop(&mut self, packet: Packet, reason: DropReason) {
        self.dropped += payload_bytes(&packet);
        self.sink.on_drop(packet, reason);
    }
}
