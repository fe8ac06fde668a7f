// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A token bucket shaper that paces packets through a bounded FIFO.
//!
//! Tokens are measured in bits and refill continuously at `rate` bits per second,
//! up to the bucket capacity. A packet is forwarded only once the bucket holds at
//! least as many tokens as the packet has bits.

use crate::{
    packet::{DropReason, Packet, PacketSink, Route},
    time::{
        timer::{self, Provider as _},
        Duration, Timer, Timestamp,
    },
};
use std::collections::VecDeque;
use tracing::{trace, warn};

#[cfg(test)]
mod tests;

pub const DEFAULT_RATE: u64 = 32768;
pub const DEFAULT_CAPACITY: u64 = 32768;
pub const DEFAULT_QUEUE_LIMIT: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Forwarded,
    Queued,
    Dropped(DropReason),
}

#[derive(Debug)]
pub struct Shaper {
    /// Refill rate in bits per second
    rate: u64,
    /// The maximum number of tokens the bucket can hold
    capacity: u64,
    /// The current number of tokens
    tokens: f64,
    /// The last time tokens were refilled
    last_update: Option<Timestamp>,
    queue: VecDeque<Packet>,
    queue_limit: usize,
    /// Fires when the head of the queue has accumulated enough tokens
    transmit_timer: Timer,
}

impl Default for Shaper {
    #[inline]
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Shaper {
    #[inline]
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Forwards the packet immediately if nothing is queued and the bucket holds enough
    /// tokens, otherwise queues it
    pub fn send<S: PacketSink>(
        &mut self,
        packet: Packet,
        route: &Route,
        now: Timestamp,
        sink: &mut S,
    ) -> Outcome {
        let bits = packet.bits();

        if bits > self.capacity {
            warn!(
                handle = packet.handle,
                bits,
                capacity = self.capacity,
                "packet exceeds bucket capacity"
            );
            sink.on_drop(packet, DropReason::Oversize);
            return Outcome::Dropped(DropReason::Oversize);
        }

        if !self.queue.is_empty() {
            return self.enqueue(packet, sink);
        }

        self.refill(now);

        if self.tokens >= bits as f64 {
            self.transmit(packet, route, sink);
            self.invariants();
            return Outcome::Forwarded;
        }

        let outcome = self.enqueue(packet, sink);
        self.schedule_transmit(now);
        self.invariants();
        outcome
    }

    /// Changes the refill rate.
    ///
    /// Tokens accrued at the previous rate are kept. A rate of 0 suspends transmission
    /// until the rate becomes positive again.
    pub fn set_rate(&mut self, rate: u64, now: Timestamp) {
        if self.rate == rate {
            return;
        }

        self.refill(now);
        trace!(prev = self.rate, rate, "shaper rate");
        self.rate = rate;

        if self.queue.is_empty() {
            self.transmit_timer.cancel();
        } else {
            self.schedule_transmit(now);
        }

        self.invariants();
    }

    /// Transmits every queued packet whose tokens are available, returning the number
    /// of forwarded packets
    pub fn on_timeout<S: PacketSink>(
        &mut self,
        now: Timestamp,
        route: &Route,
        sink: &mut S,
    ) -> usize {
        if self.transmit_timer.poll_expiration(now).is_pending() {
            return 0;
        }

        self.refill(now);

        let mut count = 0;
        while let Some(head) = self.queue.front() {
            if self.tokens < head.bits() as f64 {
                break;
            }

            if let Some(packet) = self.queue.pop_front() {
                self.transmit(packet, route, sink);
                count += 1;
            }
        }

        if !self.queue.is_empty() {
            self.schedule_transmit(now);
        }

        self.invariants();

        count
    }

    /// Drops every queued packet, notifying the sink with `reason`
    pub fn drain<S: PacketSink>(&mut self, reason: DropReason, sink: &mut S) -> usize {
        let count = self.queue.len();
        for packet in self.queue.drain(..) {
            sink.on_drop(packet, reason);
        }
        self.transmit_timer.cancel();
        count
    }

    #[inline]
    pub fn rate(&self) -> u64 {
        self.rate
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    #[inline]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn queue_limit(&self) -> usize {
        self.queue_limit
    }

    /// Returns the number of bytes waiting in the queue
    #[inline]
    pub fn queued_bytes(&self) -> u64 {
        self.queue.iter().map(|packet| packet.len as u64).sum()
    }

    #[inline]
    fn enqueue<S: PacketSink>(&mut self, packet: Packet, sink: &mut S) -> Outcome {
        if self.queue.len() >= self.queue_limit {
            warn!(
                handle = packet.handle,
                limit = self.queue_limit,
                "shaper queue full"
            );
            sink.on_drop(packet, DropReason::QueueFull);
            return Outcome::Dropped(DropReason::QueueFull);
        }

        trace!(handle = packet.handle, queued = self.queue.len() + 1, "enqueue");
        self.queue.push_back(packet);
        Outcome::Queued
    }

    #[inline]
    fn transmit<S: PacketSink>(&mut self, packet: Packet, route: &Route, sink: &mut S) {
        let bits = packet.bits() as f64;
        debug_assert!(self.tokens >= bits);
        self.tokens = (self.tokens - bits).max(0.0);
        trace!(handle = packet.handle, bits, tokens = self.tokens, "forward");
        sink.forward(packet, route);
    }

    #[inline]
    fn refill(&mut self, now: Timestamp) {
        if let Some(last_update) = self.last_update {
            let elapsed = now.saturating_duration_since(last_update);
            let capacity = self.capacity as f64;
            self.tokens = capacity.min(self.tokens + elapsed.as_secs_f64() * self.rate as f64);
        }

        // never move the refill point backwards
        if self.last_update.map_or(true, |last| last < now) {
            self.last_update = Some(now);
        }
    }

    /// Arms the transmit timer for when the head of the queue will have enough tokens
    #[inline]
    fn schedule_transmit(&mut self, now: Timestamp) {
        let Some(head) = self.queue.front() else {
            self.transmit_timer.cancel();
            return;
        };

        if self.rate == 0 {
            self.transmit_timer.cancel();
            return;
        }

        let deficit = (head.bits() as f64 - self.tokens).max(0.0);
        let micros = (deficit * 1_000_000.0 / self.rate as f64).ceil() as u64;
        let target = now + Duration::from_micros(micros);
        trace!(deficit, ?target, "schedule transmit");
        self.transmit_timer.set(target);
    }

    #[inline]
    fn invariants(&self) {
        if cfg!(debug_assertions) {
            assert!(self.tokens >= 0.0, "tokens ({}) must not be negative", self.tokens);
            assert!(
                self.tokens <= self.capacity as f64,
                "tokens ({}) must not exceed the capacity ({})",
                self.tokens,
                self.capacity
            );
            assert!(self.queue.len() <= self.queue_limit);
            assert_eq!(
                self.transmit_timer.is_armed(),
                !self.queue.is_empty() && self.rate > 0,
                "timer should be armed ({}) only while packets are queued ({}) and the rate ({}) is positive",
                self.transmit_timer.is_armed(),
                self.queue.len(),
                self.rate,
            );
        }
    }
}

impl timer::Provider for Shaper {
    #[inline]
    fn next_expiration(&self) -> Option<Timestamp> {
        self.transmit_timer.next_expiration()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Builder {
    rate: u64,
    capacity: u64,
    queue_limit: usize,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            rate: DEFAULT_RATE,
            capacity: DEFAULT_CAPACITY,
            queue_limit: DEFAULT_QUEUE_LIMIT,
        }
    }
}

impl Builder {
    /// Sets the refill rate in bits per second
    #[inline]
    pub fn with_rate(mut self, rate: u64) -> Self {
        self.rate = rate;
        self
    }

    /// Sets the bucket capacity in bits
    #[inline]
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    #[inline]
    pub fn with_queue_limit(mut self, limit: usize) -> Self {
        self.queue_limit = limit;
        self
    }

    #[inline]
    pub fn build(self) -> Shaper {
        let Self {
            rate,
            capacity,
            queue_limit,
        } = self;

        Shaper {
            rate,
            capacity,
            tokens: capacity as f64,
            last_update: None,
            queue: VecDeque::new(),
            queue_limit: queue_limit.max(1),
            transmit_timer: Timer::default(),
        }
    }
}
