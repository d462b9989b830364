//! Pause tracking and resume hysteresis
//!
//! A stream that was paused because the estimate could not cover its minimum
//! must see a meaningfully higher estimate before it resumes, otherwise an
//! estimate hovering around the minimum toggles it on and off.
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


use crate::config::AllocatorConfig;
use crate::registry::ObserverConfig;

/// Minimum bitrate `config` needs to be (re)activated.
///
/// Streams that are not paused need their plain minimum. Paused streams add
/// the resume margin, and the protection overhead they had before pausing so
/// the media part still reaches the minimum after resuming.
pub fn min_bitrate_with_hysteresis(
    config: &ObserverConfig,
    allocator_config: &AllocatorConfig,
) -> u32 {
    if !config.paused {
        return config.min_bitrate_bps();
    }

    let mut min_bitrate = config.min_bitrate_bps() as u64
        + allocator_config.toggle_margin(config.min_bitrate_bps()) as u64;
    // Frozen while paused
    if config.media_ratio > 0.0 && config.media_ratio < 1.0 {
        min_bitrate += (min_bitrate as f64 * (1.0 - config.media_ratio)) as u64;
    }
    min_bitrate.min(u32::MAX as u64) as u32
}

/// Share of `allocated_bps` left for media after `protection_bps`
pub fn media_ratio(allocated_bps: u32, protection_bps: u32) -> f64 {
    debug_assert!(allocated_bps > 0);
    if protection_bps == 0 {
        return 1.0;
    }
    let media_bps = allocated_bps.saturating_sub(protection_bps);
    media_bps as f64 / allocated_bps as f64
}

/// Outcome of one allocation for a single stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseTransition {
    /// No change in paused state
    Unchanged,
    /// Dropped to zero because the estimate was too low
    Paused,
    /// Dropped to zero because the estimate itself was zero
    NetworkDown,
    /// Released from the pause
    Resumed,
}

/// Tracks per-stream paused state and counts pause events
#[derive(Debug, Default)]
pub struct PauseTracker {
    num_pause_events: u32,
}

impl PauseTracker {
    pub fn new() -> Self {
        PauseTracker { num_pause_events: 0 }
    }

    /// Update `config.paused` for a new allocation and classify the change.
    ///
    /// Any drop to zero pauses a non-enforced stream with a nonzero minimum,
    /// but only drops under a nonzero estimate count as pause events. A
    /// paused stream is released once it receives bitrate and
    /// `release_pause` is set; the low tier keeps it paused so its resume
    /// requirement holds until the estimate covers every stream.
    pub fn record(
        &mut self,
        config: &mut ObserverConfig,
        allocated_bps: u32,
        target_bitrate_bps: u32,
        release_pause: bool,
    ) -> PauseTransition {
        let was_active = matches!(config.allocated_bitrate_bps, Some(previous) if previous > 0);

        if allocated_bps == 0 {
            if !was_active {
                return PauseTransition::Unchanged;
            }
            if !config.enforce_min_bitrate() && config.min_bitrate_bps() > 0 {
                config.paused = true;
            }
            if target_bitrate_bps == 0 {
                return PauseTransition::NetworkDown;
            }
            self.num_pause_events += 1;
            return PauseTransition::Paused;
        }

        if config.paused && release_pause {
            config.paused = false;
            return PauseTransition::Resumed;
        }
        PauseTransition::Unchanged
    }

    /// Number of pauses caused by an insufficient estimate
    pub fn num_pause_events(&self) -> u32 {
        self.num_pause_events
    }
}
