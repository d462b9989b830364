//! Pluggable allocation strategies
//!
//! A [`BitrateAllocationStrategy`] replaces the built-in allocation tiers. It
//! sees each registered stream as a [`TrackConfig`] in registration order and
//! returns one bitrate per track in the same order.
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


/// Constraints of one track as seen by a strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackConfig {
    /// Minimum bitrate (bps), 0 means no floor
    pub min_bitrate_bps: u32,
    /// Maximum bitrate (bps), 0 means unbounded
    pub max_bitrate_bps: u32,
    /// Allocate at least `min_bitrate_bps` even if the estimate is too low
    pub enforce_min_bitrate: bool,
    /// Opaque label for strategy bookkeeping
    pub track_id: String,
}

impl TrackConfig {
    /// Create a new track config
    pub fn new(
        min_bitrate_bps: u32,
        max_bitrate_bps: u32,
        enforce_min_bitrate: bool,
        track_id: impl Into<String>,
    ) -> Self {
        TrackConfig {
            min_bitrate_bps,
            max_bitrate_bps,
            enforce_min_bitrate,
            track_id: track_id.into(),
        }
    }

    /// Maximum bitrate with 0 mapped to unbounded
    pub fn effective_max_bitrate(&self) -> u32 {
        if self.max_bitrate_bps == 0 {
            u32::MAX
        } else {
            self.max_bitrate_bps
        }
    }
}

/// Replacement for the built-in allocation tiers
pub trait BitrateAllocationStrategy {
    /// Split `available_bitrate_bps` across `track_configs`.
    ///
    /// The result must hold one entry per track, in track order.
    fn allocate_bitrates(
        &mut self,
        available_bitrate_bps: u32,
        track_configs: &[&TrackConfig],
    ) -> Vec<u32>;
}

/// Every track at its minimum
pub fn set_all_bitrates_to_minimum(track_configs: &[&TrackConfig]) -> Vec<u32> {
    track_configs.iter().map(|track| track.min_bitrate_bps).collect()
}

/// Every track at its minimum plus an even share of the rest, filled up to the
/// track maximums starting with the track that has the lowest maximum.
pub fn distribute_bitrates_evenly(
    track_configs: &[&TrackConfig],
    available_bitrate_bps: u32,
) -> Vec<u32> {
    let mut allocations = set_all_bitrates_to_minimum(track_configs);
    let available = available_bitrate_bps as u64;
    let sum_min: u64 = track_configs.iter().map(|t| t.min_bitrate_bps as u64).sum();
    let sum_max: u64 = track_configs
        .iter()
        .map(|t| t.effective_max_bitrate() as u64)
        .sum();

    if sum_min >= available {
        return allocations;
    }
    if available >= sum_max {
        return track_configs
            .iter()
            .map(|track| track.effective_max_bitrate())
            .collect();
    }

    let mut order: Vec<usize> = (0..track_configs.len()).collect();
    order.sort_by_key(|&index| track_configs[index].effective_max_bitrate());

    let mut total_increase = available - sum_min;
    for (processed, &index) in order.iter().enumerate() {
        let track = track_configs[index];
        let share = total_increase / (track_configs.len() - processed) as u64;
        let headroom = track
            .effective_max_bitrate()
            .saturating_sub(track.min_bitrate_bps) as u64;
        let consumed = headroom.min(share);
        allocations[index] = allocations[index].saturating_add(consumed as u32);
        total_increase -= consumed;
    }
    allocations
}

/// Gives the audio track priority up to a sufficient bitrate.
///
/// Below the sum of minimums every track gets its minimum. Bitrate above that
/// goes to the audio track until it reaches `sufficient_audio_bitrate_bps`;
/// anything beyond is shared evenly with the audio track treated as if its
/// minimum were the sufficient bitrate. Without a matching audio track the
/// bitrate is shared evenly.
#[derive(Debug, Clone)]
pub struct AudioPriorityStrategy {
    audio_track_id: String,
    sufficient_audio_bitrate_bps: u32,
}

impl AudioPriorityStrategy {
    /// Create a new audio priority strategy
    pub fn new(audio_track_id: impl Into<String>, sufficient_audio_bitrate_bps: u32) -> Self {
        AudioPriorityStrategy {
            audio_track_id: audio_track_id.into(),
            sufficient_audio_bitrate_bps,
        }
    }
}

impl BitrateAllocationStrategy for AudioPriorityStrategy {
    fn allocate_bitrates(
        &mut self,
        available_bitrate_bps: u32,
        track_configs: &[&TrackConfig],
    ) -> Vec<u32> {
        let Some(audio_index) = track_configs
            .iter()
            .position(|track| track.track_id == self.audio_track_id)
        else {
            return distribute_bitrates_evenly(track_configs, available_bitrate_bps);
        };

        let audio = track_configs[audio_index];
        let sum_min: u64 = track_configs.iter().map(|t| t.min_bitrate_bps as u64).sum();
        let available = available_bitrate_bps as u64;
        let sufficient = self
            .sufficient_audio_bitrate_bps
            .max(audio.min_bitrate_bps)
            .min(audio.effective_max_bitrate());

        if available <= sum_min {
            return set_all_bitrates_to_minimum(track_configs);
        }

        if available <= sum_min + sufficient.saturating_sub(audio.min_bitrate_bps) as u64 {
            let mut allocations = set_all_bitrates_to_minimum(track_configs);
            allocations[audio_index] += (available - sum_min) as u32;
            return allocations;
        }

        let boosted = TrackConfig {
            min_bitrate_bps: sufficient,
            ..audio.clone()
        };
        let configs: Vec<&TrackConfig> = track_configs
            .iter()
            .enumerate()
            .map(|(index, track)| if index == audio_index { &boosted } else { *track })
            .collect();
        distribute_bitrates_evenly(&configs, available_bitrate_bps)
    }
}
