// SPDX-FileCopyrightText: 2025 The swarmwire Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Shared append-only registers between the per-peer controllers and the
//! swarm-wide consumers.
//!
//! Writers take the lock only for the append; the consumer swaps the whole
//! accumulated batch out on its own cadence, so updates are never lost and
//! never observed half-written.

use std::mem;

use tokio::sync::Mutex;

use crate::torrent::{InfoHash, PeerId};

/// One per-tick observation of a peer, consumed by the choke manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateSample {
    pub peer: PeerId,
    pub up_bps: u64,
    pub down_bps: u64,
    pub peer_interested: bool,
    pub seeder: bool,
    pub peer_choking: bool,
}

#[derive(Debug, Default)]
pub struct RateRegister {
    samples: Mutex<Vec<RateSample>>,
}

impl RateRegister {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, sample: RateSample) {
        self.samples.lock().await.push(sample);
    }

    pub async fn drain(&self) -> Vec<RateSample> {
        mem::take(&mut *self.samples.lock().await)
    }
}

/// Byte counters accumulated per tick, consumed by the status process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub info_hash: InfoHash,
    pub uploaded: u64,
    pub downloaded: u64,
}

#[derive(Debug, Default)]
pub struct StatusRegister {
    updates: Mutex<Vec<StatusUpdate>>,
}

impl StatusRegister {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, update: StatusUpdate) {
        self.updates.lock().await.push(update);
    }

    pub async fn drain(&self) -> Vec<StatusUpdate> {
        mem::take(&mut *self.updates.lock().await)
    }
}
