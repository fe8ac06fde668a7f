// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Multi-tenant bandwidth allocation driven by ECN congestion signals.
//!
//! Tagged packets are classified into per-tenant, per-objective aggregates
//! ([`division::Division`] or [`slice::Slice`]) and paced by a token bucket per flow.
//! A periodic tick, owned by [`AllocationContext`], recomputes every aggregate's share
//! from its flows' demands and the congestion marks recorded at the receivers.

pub mod alpha;
pub mod config;
pub mod context;
pub mod division;
pub mod ecn;
pub mod error;
pub mod flow;
pub mod packet;
pub mod recovery;
pub mod shaper;
pub mod slice;
pub mod time;
pub mod tunnel;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::Config;
pub use context::AllocationContext;
pub use error::{Error, Result};
