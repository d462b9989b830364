//! Allocator tuning configuration
//!
//! Hysteresis margins, padding headroom and logging cadence used by the
//! allocation passes.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use serde::Deserialize;
use std::time::Duration;

/// Allocator configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Fraction of the minimum bitrate a paused stream needs on top of its
    /// minimum before it is resumed
    pub toggle_factor: f64,
    /// Lower bound for the resume margin (bps)
    pub min_toggle_bitrate_bps: u32,
    /// Streams may be padded up to this multiple of their padding target when
    /// the estimate exceeds every maximum
    pub transmission_max_bitrate_multiplier: u32,
    /// Bitrate assumed before the first nonzero estimate arrives (bps)
    pub default_start_bitrate_bps: u32,
    /// Minimum time between two BWE log lines (milliseconds)
    pub bwe_log_interval_ms: u64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            toggle_factor: 0.1,                      // 10%
            min_toggle_bitrate_bps: 20_000,          // 20 kbps
            transmission_max_bitrate_multiplier: 2,
            default_start_bitrate_bps: 300_000,      // 300 kbps
            bwe_log_interval_ms: 5_000,
        }
    }
}

impl AllocatorConfig {
    /// Interval between BWE log lines
    pub fn bwe_log_interval(&self) -> Duration {
        Duration::from_millis(self.bwe_log_interval_ms)
    }

    /// Extra bitrate a paused stream with `min_bitrate_bps` needs to resume
    pub fn toggle_margin(&self, min_bitrate_bps: u32) -> u32 {
        let proportional = (self.toggle_factor * min_bitrate_bps as f64) as u32;
        proportional.max(self.min_toggle_bitrate_bps)
    }
}
