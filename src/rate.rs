// SPDX-FileCopyrightText: 2025 The swarmwire Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::time::Instant;

/// Sliding-window transfer rate estimator.
///
/// Tracks two counters over the same byte stream: `window` feeds the
/// bytes-per-second estimate handed to the choke manager, `total` feeds the
/// per-tick byte deltas handed to the status process. Each extract renews its
/// own counter without disturbing the other.
#[derive(Debug)]
pub struct Rate {
    total: u64,
    window: u64,
    window_start: Instant,
}

impl Rate {
    pub fn new(now: Instant) -> Self {
        Self {
            total: 0,
            window: 0,
            window_start: now,
        }
    }

    pub fn update(&mut self, bytes: u64) {
        self.total += bytes;
        self.window += bytes;
    }

    /// Bytes per second observed since the previous rate extract. The window
    /// origin advances to `now`.
    pub fn extract_rate(&mut self, now: Instant) -> u64 {
        let elapsed = now
            .saturating_duration_since(self.window_start)
            .as_secs_f64()
            .max(0.001);
        let bps = (self.window as f64 / elapsed) as u64;
        self.window = 0;
        self.window_start = now;
        bps
    }

    /// Total bytes observed since the previous count extract; the counter
    /// resets.
    pub fn extract_count(&mut self) -> u64 {
        std::mem::take(&mut self.total)
    }
}
