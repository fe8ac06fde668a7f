// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::time::Timestamp;
use core::fmt;
use std::net::IpAddr;

pub type TenantId = u32;
pub type FlowId = u64;

/// The scheduling goal of a flow
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    any(test, feature = "generator"),
    derive(bolero_generator::TypeGenerator)
)]
pub enum Objective {
    /// Constant demand regardless of progress
    LatencySensitive,
    /// Demand grows as the deadline approaches
    DeadlineSensitive,
    /// Short flows are favored; demand decays with progress
    CompletionSensitive,
}

impl Objective {
    pub const ALL: [Objective; 3] = [
        Self::LatencySensitive,
        Self::DeadlineSensitive,
        Self::CompletionSensitive,
    ];

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LatencySensitive => "LS",
            Self::DeadlineSensitive => "DS",
            Self::CompletionSensitive => "CS",
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a flow.
///
/// Ordering compares the fields in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FiveTuple {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub protocol: u8,
    pub src_port: u16,
    pub dst_port: u16,
}

impl FiveTuple {
    /// Returns the tuple of traffic flowing in the opposite direction
    #[inline]
    pub fn reversed(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
            protocol: self.protocol,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }

    #[inline]
    pub fn route(&self) -> Route {
        Route {
            src: self.src,
            dst: self.dst,
        }
    }
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} ({})",
            self.src, self.src_port, self.dst, self.dst_port, self.protocol
        )
    }
}

/// The ECN codepoint from the IP header
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(
    any(test, feature = "generator"),
    derive(bolero_generator::TypeGenerator)
)]
pub enum Ecn {
    #[default]
    NotEct,
    Ect1,
    Ect0,
    Ce,
}

impl Ecn {
    /// Decodes the two low bits of the traffic class field
    #[inline]
    pub fn new(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::NotEct,
            0b01 => Self::Ect1,
            0b10 => Self::Ect0,
            _ => Self::Ce,
        }
    }

    #[inline]
    pub fn congestion_experienced(self) -> bool {
        matches!(self, Self::Ce)
    }
}

/// Allocation metadata attached to each outgoing packet before it reaches the core
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tag {
    pub flow_id: FlowId,
    pub tenant: TenantId,
    pub objective: Objective,
    /// Total size of the flow in bytes; 0 means unbounded
    pub flow_size: u64,
    /// Payload bytes carried by this packet
    pub packet_size: u32,
    pub deadline: Option<Timestamp>,
}

/// The forwarding target handed back to the network layer
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Route {
    pub src: IpAddr,
    pub dst: IpAddr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    /// Opaque value the caller uses to correlate the packet with its own buffers
    pub handle: u64,
    pub tuple: FiveTuple,
    /// Bytes on the wire, used for shaping
    pub len: u32,
    pub tag: Option<Tag>,
}

impl Packet {
    #[inline]
    pub fn bits(&self) -> u64 {
        self.len as u64 * 8
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// The shaper queue was at its limit
    QueueFull,
    /// The packet is larger than the shaper bucket and could never be sent
    Oversize,
    /// The owning flow was evicted while the packet was still queued
    Evicted,
}

/// Receives packets released by the core
pub trait PacketSink {
    fn forward(&mut self, packet: Packet, route: &Route);

    #[inline]
    fn on_drop(&mut self, packet: Packet, reason: DropReason) {
        let _ = (packet, reason);
    }
}

impl<S: PacketSink + ?Sized> PacketSink for &mut S {
    #[inline]
    fn forward(&mut self, packet: Packet, route: &Route) {
        (**self).forward(packet, route)
    }

    #[inline]
    fn on_drop(&mut self, packet: Packet, reason: DropReason) {
        (**self).on_drop(packet, reason)
    }
}
