//! Allocation limits published to the transport
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
use crate::hysteresis::min_bitrate_with_hysteresis;
use crate::observer::LimitObserver;
use crate::registry::ObserverConfig;
use std::sync::Arc;
use tracing::debug;

/// Aggregate send limits of all registered streams
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationLimits {
    /// Sum of the minimum bitrates (bps)
    pub min_send_bitrate_bps: u32,
    /// Sum of the padding targets (bps)
    pub max_padding_bitrate_bps: u32,
}

impl AllocationLimits {
    /// Compute the limits for `configs`.
    ///
    /// A non-enforced stream currently allocated 0 asks for at least its
    /// resume bitrate as padding, so probing can lift it out of the pause.
    pub fn from_configs(configs: &[ObserverConfig], allocator_config: &AllocatorConfig) -> Self {
        let mut min_send: u64 = 0;
        let mut padding: u64 = 0;

        for config in configs {
            min_send += config.min_bitrate_bps() as u64;

            let mut stream_padding = config.pad_up_bitrate_bps;
            if !config.enforce_min_bitrate() && config.allocated_bitrate_bps == Some(0) {
                stream_padding =
                    stream_padding.max(min_bitrate_with_hysteresis(config, allocator_config));
            }
            padding += stream_padding as u64;
        }

        AllocationLimits {
            min_send_bitrate_bps: min_send.min(u32::MAX as u64) as u32,
            max_padding_bitrate_bps: padding.min(u32::MAX as u64) as u32,
        }
    }
}

/// Reports limits to the limit observer and remembers what it reported
pub struct LimitsPublisher {
    limit_observer: Arc<dyn LimitObserver>,
    last_published: Option<AllocationLimits>,
}

impl LimitsPublisher {
    pub fn new(limit_observer: Arc<dyn LimitObserver>) -> Self {
        LimitsPublisher {
            limit_observer,
            last_published: None,
        }
    }

    /// Publish unconditionally
    pub fn publish(&mut self, limits: AllocationLimits) {
        debug!(
            min_send_bitrate_bps = limits.min_send_bitrate_bps,
            max_padding_bitrate_bps = limits.max_padding_bitrate_bps,
            "Allocation limits changed"
        );
        self.limit_observer
            .on_allocation_limits_changed(limits.min_send_bitrate_bps, limits.max_padding_bitrate_bps);
        self.last_published = Some(limits);
    }

    /// Publish only if `limits` differ from the last published ones
    pub fn publish_if_changed(&mut self, limits: AllocationLimits) -> bool {
        if self.last_published == Some(limits) {
            return false;
        }
        self.publish(limits);
        true
    }

    pub fn last_published(&self) -> Option<AllocationLimits> {
        self.last_published
    }
}
