//! Observer registry
//!
//! Registered send streams in insertion order. The order is the tie-break for
//! every allocation decision, so identical inputs give identical outputs.
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


use crate::observer::BitrateAllocatorObserver;
use crate::strategy::TrackConfig;
use std::fmt;
use std::sync::{Arc, Weak};

/// Non-owning handle to a registered observer
pub type ObserverHandle = Weak<dyn BitrateAllocatorObserver>;

/// Downgrade a caller-owned observer into a registry handle
pub fn observer_handle<O>(observer: &Arc<O>) -> ObserverHandle
where
    O: BitrateAllocatorObserver + 'static,
{
    let handle: Weak<O> = Arc::downgrade(observer);
    handle
}

/// Bitrate constraints supplied when registering a stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObserverSettings {
    /// Minimum bitrate (bps), 0 means no floor
    pub min_bitrate_bps: u32,
    /// Maximum bitrate (bps), 0 means unbounded
    pub max_bitrate_bps: u32,
    /// Bitrate the stream wants padded up to when there is surplus (bps)
    pub pad_up_bitrate_bps: u32,
    /// Keep the minimum even when the estimate cannot cover every stream
    pub enforce_min_bitrate: bool,
    /// Opaque label passed through to allocation strategies
    pub track_id: String,
}

impl ObserverSettings {
    /// Create new observer settings
    pub fn new(
        min_bitrate_bps: u32,
        max_bitrate_bps: u32,
        pad_up_bitrate_bps: u32,
        enforce_min_bitrate: bool,
        track_id: impl Into<String>,
    ) -> Self {
        ObserverSettings {
            min_bitrate_bps,
            max_bitrate_bps,
            pad_up_bitrate_bps,
            enforce_min_bitrate,
            track_id: track_id.into(),
        }
    }
}

/// Registry entry: constraints plus running state of one stream
pub struct ObserverConfig {
    observer: ObserverHandle,
    /// Constraints shared with allocation strategies
    pub track: TrackConfig,
    /// Padding target (bps)
    pub pad_up_bitrate_bps: u32,
    /// Last allocation handed to the observer, `None` before the first one
    pub allocated_bitrate_bps: Option<u32>,
    /// Share of the last nonzero allocation used for media, in `[0.0, 1.0]`
    pub media_ratio: f64,
    /// Under resume hysteresis: set when the stream drops to zero, cleared
    /// once it is allocated bitrate outside the low tier
    pub paused: bool,
}

impl ObserverConfig {
    pub(crate) fn new(observer: ObserverHandle, settings: ObserverSettings) -> Self {
        ObserverConfig {
            observer,
            track: TrackConfig::new(
                settings.min_bitrate_bps,
                settings.max_bitrate_bps,
                settings.enforce_min_bitrate,
                settings.track_id,
            ),
            pad_up_bitrate_bps: settings.pad_up_bitrate_bps,
            allocated_bitrate_bps: None,
            media_ratio: 1.0,
            paused: false,
        }
    }

    /// Replace the constraints, keeping running state
    pub(crate) fn apply_settings(&mut self, settings: ObserverSettings) {
        self.track.min_bitrate_bps = settings.min_bitrate_bps;
        self.track.max_bitrate_bps = settings.max_bitrate_bps;
        self.track.enforce_min_bitrate = settings.enforce_min_bitrate;
        self.track.track_id = settings.track_id;
        self.pad_up_bitrate_bps = settings.pad_up_bitrate_bps;
    }

    pub fn min_bitrate_bps(&self) -> u32 {
        self.track.min_bitrate_bps
    }

    /// Maximum bitrate with 0 mapped to unbounded
    pub fn max_bitrate_bps(&self) -> u32 {
        self.track.effective_max_bitrate()
    }

    pub fn enforce_min_bitrate(&self) -> bool {
        self.track.enforce_min_bitrate
    }

    pub fn track_id(&self) -> &str {
        &self.track.track_id
    }

    /// Last allocation, or the minimum for a stream that was never allocated
    /// so new streams do not have to clear the resume margin.
    pub fn last_allocated_bitrate(&self) -> u32 {
        self.allocated_bitrate_bps
            .unwrap_or(self.track.min_bitrate_bps)
    }

    /// Upgrade the handle, `None` if the caller already dropped the observer
    pub fn observer(&self) -> Option<Arc<dyn BitrateAllocatorObserver>> {
        self.observer.upgrade()
    }

    pub fn is_observer(&self, handle: &ObserverHandle) -> bool {
        Weak::ptr_eq(&self.observer, handle)
    }
}

impl fmt::Debug for ObserverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverConfig")
            .field("track", &self.track)
            .field("pad_up_bitrate_bps", &self.pad_up_bitrate_bps)
            .field("allocated_bitrate_bps", &self.allocated_bitrate_bps)
            .field("media_ratio", &self.media_ratio)
            .field("paused", &self.paused)
            .finish()
    }
}

/// Insertion-ordered observer registry
#[derive(Debug, Default)]
pub struct ObserverRegistry {
    configs: Vec<ObserverConfig>,
}

impl ObserverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        ObserverRegistry {
            configs: Vec::new(),
        }
    }

    /// Position of `handle` in registration order
    pub fn position(&self, handle: &ObserverHandle) -> Option<usize> {
        self.configs.iter().position(|config| config.is_observer(handle))
    }

    pub fn contains(&self, handle: &ObserverHandle) -> bool {
        self.position(handle).is_some()
    }

    pub fn get(&self, handle: &ObserverHandle) -> Option<&ObserverConfig> {
        self.configs.iter().find(|config| config.is_observer(handle))
    }

    pub fn get_mut(&mut self, handle: &ObserverHandle) -> Option<&mut ObserverConfig> {
        self.configs.iter_mut().find(|config| config.is_observer(handle))
    }

    /// Append a new entry at the end of the registration order
    pub(crate) fn push(&mut self, config: ObserverConfig) {
        self.configs.push(config);
    }

    /// Remove an entry, keeping the order of the others
    pub(crate) fn remove(&mut self, handle: &ObserverHandle) -> Option<ObserverConfig> {
        let index = self.position(handle)?;
        Some(self.configs.remove(index))
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn configs(&self) -> &[ObserverConfig] {
        &self.configs
    }

    pub(crate) fn configs_mut(&mut self) -> &mut [ObserverConfig] {
        &mut self.configs
    }

    /// Track constraints in registration order, as handed to strategies
    pub fn track_configs(&self) -> Vec<&TrackConfig> {
        self.configs.iter().map(|config| &config.track).collect()
    }

    pub fn sum_min_bitrates(&self) -> u64 {
        self.configs
            .iter()
            .map(|config| config.min_bitrate_bps() as u64)
            .sum()
    }

    pub fn sum_max_bitrates(&self) -> u64 {
        self.configs
            .iter()
            .map(|config| config.max_bitrate_bps() as u64)
            .sum()
    }
}
