// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Accounting of ECN-marked bytes, keyed by tenant, objective and endpoint pair

use crate::packet::{Objective, Route, TenantId};
use hashbrown::HashMap;
use std::net::IpAddr;

/// Counts marked and total payload bytes between two resets.
///
/// The recorder never resets itself; the consumer owns the reset cadence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EcnRecorder {
    marked_bytes: u64,
    total_bytes: u64,
}

impl EcnRecorder {
    #[inline]
    pub fn on_packet_received(&mut self, congestion_experienced: bool, payload_bytes: u64) {
        self.total_bytes = self.total_bytes.saturating_add(payload_bytes);
        if congestion_experienced {
            self.marked_bytes = self.marked_bytes.saturating_add(payload_bytes);
        }
    }

    /// Returns `marked / total`, or 0 if nothing has been received
    #[inline]
    pub fn marked_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.marked_bytes as f64 / self.total_bytes as f64
    }

    #[inline]
    pub fn marked_bytes(&self) -> u64 {
        self.marked_bytes
    }

    #[inline]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecorderKey {
    pub tenant: TenantId,
    pub objective: Objective,
    pub src: IpAddr,
    pub dst: IpAddr,
}

impl RecorderKey {
    #[inline]
    pub fn new(tenant: TenantId, objective: Objective, route: &Route) -> Self {
        Self {
            tenant,
            objective,
            src: route.src,
            dst: route.dst,
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

/// Recorders created on demand, one per key
#[derive(Debug, Default)]
pub struct Registry {
    recorders: HashMap<RecorderKey, EcnRecorder>,
}

impl Registry {
    /// Records a received packet, creating the recorder if needed
    #[inline]
    pub fn on_packet_received(
        &mut self,
        key: RecorderKey,
        congestion_experienced: bool,
        payload_bytes: u64,
    ) {
        self.get_or_create(key)
            .on_packet_received(congestion_experienced, payload_bytes);
    }

    #[inline]
    pub fn get_or_create(&mut self, key: RecorderKey) -> &mut EcnRecorder {
        self.recorders.entry(key).or_default()
    }

    #[inline]
    pub fn get(&self, key: &RecorderKey) -> Option<&EcnRecorder> {
        self.recorders.get(key)
    }

    /// Returns the recorder's current state and resets it
    #[inline]
    pub fn take(&mut self, key: &RecorderKey) -> EcnRecorder {
        self.recorders
            .get_mut(key)
            .map(core::mem::take)
            .unwrap_or_default()
    }

    #[inline]
    pub fn remove(&mut self, key: &RecorderKey) -> Option<EcnRecorder> {
        self.recorders.remove(key)
    }

    /// Keeps only the recorders for which `f` returns `true`
    #[inline]
    pub fn retain<F>(&mut self, mut f: F)
    where
        F: FnMut(&RecorderKey, &mut EcnRecorder) -> bool,
    {
        self.recorders.retain(|key, recorder| f(key, recorder));
    }

    #[inline]
    pub fn keys(&self) -> impl Iterator<Item = &RecorderKey> {
        self.recorders.keys()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.recorders.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.recorders.is_empty()
    }
}
