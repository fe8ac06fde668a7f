// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    packet::{DropReason, FiveTuple, FlowId, Objective, Packet, PacketSink, Route, Tag, TenantId},
    time::{testing as clock, Timestamp},
};
use std::net::Ipv4Addr;

pub fn init_tracing() {
    if cfg!(any(miri, fuzzing)) {
        return;
    }

    use std::sync::Once;

    static TRACING: Once = Once::new();

    // make sure this only gets initialized once
    TRACING.call_once(|| {
        let format = tracing_subscriber::fmt::format()
            .with_timer(SimTime)
            .compact(); // Use a less verbose output format.

        let default_level = if std::env::var("CI").is_ok() {
            // The CI runs out of memory if we log too much tracing data
            tracing::Level::INFO
        } else if cfg!(debug_assertions) {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        };

        let env_filter = tracing_subscriber::EnvFilter::builder()
            .with_default_directive(default_level.into())
            .with_env_var("S2N_LOG")
            .from_env_lossy();

        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .event_format(format)
            .with_test_writer()
            .try_init();
    });
}

/// Formats event times from the thread-local testing clock rather than the wall clock
struct SimTime;

impl tracing_subscriber::fmt::time::FormatTime for SimTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", clock::now())
    }
}

/// A [`PacketSink`] that records everything it receives
#[derive(Debug, Default)]
pub struct Sink {
    pub forwarded: Vec<(Packet, Route)>,
    pub dropped: Vec<(Packet, DropReason)>,
}

impl Sink {
    /// Returns the total number of bytes forwarded for the given flow
    pub fn forwarded_bytes(&self, flow_id: FlowId) -> u64 {
        self.forwarded
            .iter()
            .filter(|(packet, _)| packet.tag.is_some_and(|tag| tag.flow_id == flow_id))
            .map(|(packet, _)| packet.len as u64)
            .sum()
    }
}

impl PacketSink for Sink {
    fn forward(&mut self, packet: Packet, route: &Route) {
        self.forwarded.push((packet, *route));
    }

    fn on_drop(&mut self, packet: Packet, reason: DropReason) {
        self.dropped.push((packet, reason));
    }
}

/// Returns a TCP tuple between `10.0.0.{src}` and `10.0.0.{dst}`
pub fn tuple(src: u8, dst: u8, src_port: u16) -> FiveTuple {
    FiveTuple {
        src: Ipv4Addr::new(10, 0, 0, src).into(),
        dst: Ipv4Addr::new(10, 0, 0, dst).into(),
        protocol: 6,
        src_port,
        dst_port: 5000,
    }
}

pub fn tag(flow_id: FlowId, tenant: TenantId, objective: Objective, flow_size: u64) -> Tag {
    Tag {
        flow_id,
        tenant,
        objective,
        flow_size,
        packet_size: 1000,
        deadline: None,
    }
}

/// Builds a tagged packet carrying `tag.packet_size` payload bytes
pub fn packet(handle: u64, tuple: FiveTuple, tag: Tag) -> Packet {
    Packet {
        handle,
        tuple,
        len: tag.packet_size,
        tag: Some(tag),
    }
}

pub fn deadline_in(now: Timestamp, millis: u64) -> Option<Timestamp> {
    Some(now + core::time::Duration::from_millis(millis))
}
