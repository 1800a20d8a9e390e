// SPDX-FileCopyrightText: 2025 The swarmwire Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::Path;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::{event, Level};

/// Engine tunables, fixed for the lifetime of each peer it spawns.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Receiver → controller channel depth.
    pub inbound_queue_depth: usize,
    /// Controller → sender-queue channel depth.
    pub outbound_queue_depth: usize,
    /// Idle time after which the sender queue emits a KEEPALIVE.
    pub keepalive_interval_secs: u64,
    /// A peer silent for longer than this is disconnected.
    pub inactivity_timeout_secs: u64,
    /// Cadence of the rate/status publishing tick.
    pub rate_tick_secs: u64,
    /// Initial upload budget in bytes. `None` disables upload throttling;
    /// with `Some`, the choke manager tops the budget up through grants.
    pub upload_budget_bytes: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            inbound_queue_depth: 64,
            outbound_queue_depth: 64,
            keepalive_interval_secs: 60,
            inactivity_timeout_secs: 120,
            rate_tick_secs: 5,
            upload_budget_bytes: None,
        }
    }
}

/// Loads settings from a TOML file merged with `SWARMWIRE_`-prefixed
/// environment variables. Falls back to defaults when the file is absent or
/// malformed.
pub fn load_settings(path: &Path) -> Settings {
    match Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("SWARMWIRE_"))
        .extract::<Settings>()
    {
        Ok(settings) => settings,
        Err(e) => {
            event!(Level::ERROR, "Failed to load settings at {:?}: {}", path, e);
            Settings::default()
        }
    }
}
