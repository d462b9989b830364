//! Built-in allocation tiers
//!
//! The target bitrate is compared against the sum of minimums and the sum of
//! maximums of all registered streams to pick one of four tiers:
//!
//! - **zero**: the estimate is 0, everyone is paused
//! - **max**: the estimate covers every max, everyone gets its max plus an
//!   even share of padding headroom
//! - **normal**: everyone gets its minimum plus an even share up to its max
//! - **low**: not every minimum fits, enforced minimums first, then streams
//!   that are not paused, then paused streams
//!
//! Allocations are returned as one bitrate per stream in registration order.
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
use crate::registry::{ObserverConfig, ObserverRegistry};

/// Which built-in tier produced an allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationTier {
    Zero,
    Low,
    Normal,
    Max,
}

/// Upper bound used when distributing surplus bitrate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionCap {
    /// `max_multiplier` x max bitrate
    MaxBitrate,
    /// The larger of max bitrate and `max_multiplier` x padding target
    PaddingHeadroom,
}

impl DistributionCap {
    fn cap(self, config: &ObserverConfig, max_multiplier: u32) -> u64 {
        let max_bitrate = config.max_bitrate_bps() as u64;
        match self {
            DistributionCap::MaxBitrate => max_bitrate * max_multiplier as u64,
            DistributionCap::PaddingHeadroom => {
                max_bitrate.max(config.pad_up_bitrate_bps as u64 * max_multiplier as u64)
            }
        }
    }
}

/// Run the tier selected for `target_bitrate_bps`
pub fn allocate_with_tiers(
    target_bitrate_bps: u32,
    registry: &ObserverRegistry,
    allocator_config: &AllocatorConfig,
) -> (AllocationTier, Vec<u32>) {
    let configs = registry.configs();
    if target_bitrate_bps == 0 {
        return (AllocationTier::Zero, zero_rate_allocation(configs));
    }

    // Checked first: covering every max leaves no stream to pause
    let sum_max_bitrates = registry.sum_max_bitrates();
    if target_bitrate_bps as u64 >= sum_max_bitrates {
        return (
            AllocationTier::Max,
            max_rate_allocation(target_bitrate_bps, sum_max_bitrates, configs, allocator_config),
        );
    }

    let sum_min_bitrates = registry.sum_min_bitrates();
    if enough_bitrate_for_all_observers(
        target_bitrate_bps,
        sum_min_bitrates,
        configs,
        allocator_config,
    ) {
        return (
            AllocationTier::Normal,
            normal_rate_allocation(target_bitrate_bps, sum_min_bitrates, configs),
        );
    }

    (
        AllocationTier::Low,
        low_rate_allocation(target_bitrate_bps, configs, allocator_config),
    )
}

/// True if every stream can get its minimum, and every paused stream its
/// minimum plus resume margin once the surplus is shared evenly.
pub fn enough_bitrate_for_all_observers(
    target_bitrate_bps: u32,
    sum_min_bitrates: u64,
    configs: &[ObserverConfig],
    allocator_config: &AllocatorConfig,
) -> bool {
    let target = target_bitrate_bps as u64;
    if target < sum_min_bitrates {
        return false;
    }
    if configs.is_empty() {
        return true;
    }

    let extra_bitrate_per_observer = (target - sum_min_bitrates) / configs.len() as u64;
    configs.iter().filter(|config| config.paused).all(|config| {
        config.min_bitrate_bps() as u64 + extra_bitrate_per_observer
            >= min_bitrate_with_hysteresis(config, allocator_config) as u64
    })
}

pub fn zero_rate_allocation(configs: &[ObserverConfig]) -> Vec<u32> {
    vec![0; configs.len()]
}

/// Allocation when the estimate cannot cover every minimum.
///
/// Enforced minimums are granted in registration order while they fit; once
/// one does not fit, later enforced streams and all other streams get 0. If
/// every enforced minimum fits, streams that are not paused get their minimum
/// while it fits, then paused streams get their resume bitrate (capped at
/// their max) while it fits. Nothing is handed out beyond that.
pub fn low_rate_allocation(
    target_bitrate_bps: u32,
    configs: &[ObserverConfig],
    allocator_config: &AllocatorConfig,
) -> Vec<u32> {
    let mut allocation = vec![0; configs.len()];
    let mut remaining = target_bitrate_bps as u64;

    for (index, config) in configs.iter().enumerate() {
        if !config.enforce_min_bitrate() {
            continue;
        }
        let min_bitrate = config.min_bitrate_bps() as u64;
        if min_bitrate > remaining {
            return allocation;
        }
        allocation[index] = config.min_bitrate_bps();
        remaining -= min_bitrate;
    }

    for paused in [false, true] {
        for (index, config) in configs.iter().enumerate() {
            if config.enforce_min_bitrate() || config.paused != paused {
                continue;
            }
            let required = min_bitrate_with_hysteresis(config, allocator_config)
                .min(config.max_bitrate_bps());
            if remaining >= required as u64 {
                allocation[index] = required;
                remaining -= required as u64;
            }
        }
    }

    allocation
}

/// Every stream at its minimum, the rest shared evenly up to the max bitrates
pub fn normal_rate_allocation(
    target_bitrate_bps: u32,
    sum_min_bitrates: u64,
    configs: &[ObserverConfig],
) -> Vec<u32> {
    let mut allocation: Vec<u32> = configs.iter().map(|c| c.min_bitrate_bps()).collect();

    let remaining = (target_bitrate_bps as u64).saturating_sub(sum_min_bitrates);
    if remaining > 0 {
        distribute_evenly(
            configs,
            remaining,
            true,
            1,
            DistributionCap::MaxBitrate,
            &mut allocation,
        );
    }
    allocation
}

/// Every stream at its max, the surplus converted into padding
pub fn max_rate_allocation(
    target_bitrate_bps: u32,
    sum_max_bitrates: u64,
    configs: &[ObserverConfig],
    allocator_config: &AllocatorConfig,
) -> Vec<u32> {
    let mut allocation: Vec<u32> = configs.iter().map(|c| c.max_bitrate_bps()).collect();

    let remaining = (target_bitrate_bps as u64).saturating_sub(sum_max_bitrates);
    if remaining > 0 {
        distribute_evenly(
            configs,
            remaining,
            true,
            allocator_config.transmission_max_bitrate_multiplier,
            DistributionCap::PaddingHeadroom,
            &mut allocation,
        );
    }
    allocation
}

/// Split `remaining` evenly on top of `allocation`.
///
/// Streams with a zero allocation only take part if `include_zero_allocations`
/// is set; the built-in tiers always include them so paused streams can
/// recover, strategies may not. Streams are visited from the least headroom
/// (cap minus current allocation) upwards, ties in registration order; each
/// takes an equal share of what is left, clamped to its cap, and the unspent
/// part carries over to the streams after it. Returns the bitrate nobody could
/// take, which is 0 whenever the summed headroom covers `remaining`.
pub fn distribute_evenly(
    configs: &[ObserverConfig],
    mut remaining: u64,
    include_zero_allocations: bool,
    max_multiplier: u32,
    cap: DistributionCap,
    allocation: &mut [u32],
) -> u64 {
    debug_assert_eq!(configs.len(), allocation.len());

    let mut eligible: Vec<(u64, usize)> = configs
        .iter()
        .enumerate()
        .filter(|(index, _)| include_zero_allocations || allocation[*index] != 0)
        .map(|(index, config)| {
            let limit = cap.cap(config, max_multiplier).min(u32::MAX as u64);
            (limit.saturating_sub(allocation[index] as u64), index)
        })
        .collect();
    eligible.sort_by_key(|&(headroom, _)| headroom);

    let count = eligible.len();
    for (visited, &(_, index)) in eligible.iter().enumerate() {
        let share = remaining / (count - visited) as u64;
        remaining -= share;

        let current = allocation[index] as u64;
        let limit = cap
            .cap(&configs[index], max_multiplier)
            .max(current)
            .min(u32::MAX as u64);
        let mut total = current + share;
        if total > limit {
            remaining += total - limit;
            total = limit;
        }
        allocation[index] = total as u32;
    }
    remaining
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::BitrateAllocatorObserver;
    use crate::registry::{observer_handle, ObserverSettings};
    use std::sync::Arc;

    struct NullObserver;

    impl BitrateAllocatorObserver for NullObserver {
        fn on_bitrate_updated(&self, _: u32, _: u8, _: i64, _: i64) -> u32 {
            0
        }
    }

    fn build(settings: &[ObserverSettings]) -> (Vec<Arc<NullObserver>>, ObserverRegistry) {
        let observers: Vec<Arc<NullObserver>> =
            settings.iter().map(|_| Arc::new(NullObserver)).collect();
        let mut registry = ObserverRegistry::new();
        for (observer, s) in observers.iter().zip(settings) {
            registry.push(ObserverConfig::new(observer_handle(observer), s.clone()));
        }
        (observers, registry)
    }

    #[test]
    fn test_zero_rate() {
        let (_observers, registry) = build(&[
            ObserverSettings::new(100_000, 300_000, 0, true, "a"),
            ObserverSettings::new(0, 0, 0, false, "b"),
        ]);
        let (tier, allocation) = allocate_with_tiers(0, &registry, &AllocatorConfig::default());
        assert_eq!(tier, AllocationTier::Zero);
        assert_eq!(allocation, vec![0, 0]);
    }

    #[test]
    fn test_low_rate_enforced_first() {
        let (_observers, registry) = build(&[
            ObserverSettings::new(100_000, 300_000, 0, true, "a"),
            ObserverSettings::new(200_000, 400_000, 0, false, "b"),
        ]);
        let (tier, allocation) =
            allocate_with_tiers(150_000, &registry, &AllocatorConfig::default());
        assert_eq!(tier, AllocationTier::Low);
        assert_eq!(allocation, vec![100_000, 0]);
    }

    #[test]
    fn test_low_rate_never_overallocates_enforced() {
        let (_observers, registry) = build(&[
            ObserverSettings::new(100_000, 0, 0, true, "a"),
            ObserverSettings::new(100_000, 0, 0, true, "b"),
            ObserverSettings::new(10_000, 0, 0, true, "c"),
            ObserverSettings::new(10_000, 0, 0, false, "d"),
        ]);
        let allocation =
            low_rate_allocation(150_000, registry.configs(), &AllocatorConfig::default());
        // b does not fit, so c and d get nothing either
        assert_eq!(allocation, vec![100_000, 0, 0, 0]);
    }

    #[test]
    fn test_low_rate_unpaused_before_paused() {
        let (_observers, mut registry) = build(&[
            ObserverSettings::new(100_000, 0, 0, false, "a"),
            ObserverSettings::new(100_000, 0, 0, false, "b"),
        ]);
        registry.configs_mut()[0].allocated_bitrate_bps = Some(0);
        registry.configs_mut()[0].paused = true;
        registry.configs_mut()[1].allocated_bitrate_bps = Some(150_000);

        let allocation =
            low_rate_allocation(150_000, registry.configs(), &AllocatorConfig::default());
        assert_eq!(allocation, vec![0, 100_000]);
    }

    #[test]
    fn test_normal_rate_even_split_with_caps() {
        let (_observers, registry) = build(&[
            ObserverSettings::new(100_000, 150_000, 0, false, "a"),
            ObserverSettings::new(100_000, 1_000_000, 0, false, "b"),
        ]);
        let (tier, allocation) =
            allocate_with_tiers(500_000, &registry, &AllocatorConfig::default());
        assert_eq!(tier, AllocationTier::Normal);
        // a is capped at 150k, the rest of its share goes to b
        assert_eq!(allocation, vec![150_000, 350_000]);
    }

    #[test]
    fn test_max_rate_pads_up_to_headroom() {
        let (_observers, registry) = build(&[
            ObserverSettings::new(50_000, 100_000, 0, false, "a"),
            ObserverSettings::new(50_000, 100_000, 150_000, false, "b"),
        ]);
        let (tier, allocation) =
            allocate_with_tiers(1_000_000, &registry, &AllocatorConfig::default());
        assert_eq!(tier, AllocationTier::Max);
        // a has no padding target and stays at max, b may go up to 2 x 150k
        assert_eq!(allocation, vec![100_000, 300_000]);
    }

    #[test]
    fn test_paused_stream_blocks_normal_tier_until_margin() {
        let (_observers, mut registry) = build(&[ObserverSettings::new(
            100_000, 500_000, 0, false, "a",
        )]);
        registry.configs_mut()[0].allocated_bitrate_bps = Some(0);
        registry.configs_mut()[0].paused = true;
        let allocator_config = AllocatorConfig::default();

        let (tier, allocation) = allocate_with_tiers(110_000, &registry, &allocator_config);
        assert_eq!(tier, AllocationTier::Low);
        assert_eq!(allocation, vec![0]);

        let (tier, allocation) = allocate_with_tiers(120_000, &registry, &allocator_config);
        assert_eq!(tier, AllocationTier::Normal);
        assert_eq!(allocation, vec![120_000]);
    }

    #[test]
    fn test_distribute_evenly_skips_zero_allocations() {
        let (_observers, registry) = build(&[
            ObserverSettings::new(0, 1_000, 0, false, "a"),
            ObserverSettings::new(0, 1_000, 0, false, "b"),
            ObserverSettings::new(0, 1_000, 0, false, "c"),
        ]);
        let mut allocation = vec![100, 0, 100];
        let leftover = distribute_evenly(
            registry.configs(),
            301,
            false,
            1,
            DistributionCap::MaxBitrate,
            &mut allocation,
        );
        assert_eq!(leftover, 0);
        assert_eq!(allocation, vec![250, 0, 251]);
    }

    #[test]
    fn test_distribute_evenly_reports_leftover() {
        let (_observers, registry) = build(&[ObserverSettings::new(0, 1_000, 0, false, "a")]);
        let mut allocation = vec![900];
        let leftover = distribute_evenly(
            registry.configs(),
            500,
            true,
            1,
            DistributionCap::MaxBitrate,
            &mut allocation,
        );
        assert_eq!(allocation, vec![1_000]);
        assert_eq!(leftover, 400);
    }

    #[test]
    fn test_low_rate_paused_stream_gets_resume_bitrate() {
        let (_observers, mut registry) = build(&[
            ObserverSettings::new(100_000, 0, 0, false, "a"),
            ObserverSettings::new(100_000, 0, 0, false, "b"),
        ]);
        registry.configs_mut()[1].allocated_bitrate_bps = Some(0);
        registry.configs_mut()[1].paused = true;
        let allocator_config = AllocatorConfig::default();

        // b needs 120k, the shared surplus of 15k is not enough for Normal
        let (tier, allocation) = allocate_with_tiers(230_000, &registry, &allocator_config);
        assert_eq!(tier, AllocationTier::Low);
        assert_eq!(allocation, vec![100_000, 120_000]);

        let (_, allocation) = allocate_with_tiers(219_999, &registry, &allocator_config);
        assert_eq!(allocation, vec![100_000, 0]);
    }

    #[test]
    fn test_low_rate_resume_bitrate_capped_at_max() {
        let (_observers, mut registry) = build(&[
            ObserverSettings::new(100_000, 500_000, 0, false, "a"),
            ObserverSettings::new(100_000, 110_000, 0, false, "b"),
        ]);
        registry.configs_mut()[1].allocated_bitrate_bps = Some(0);
        registry.configs_mut()[1].paused = true;

        let allocation =
            low_rate_allocation(215_000, registry.configs(), &AllocatorConfig::default());
        assert_eq!(allocation, vec![100_000, 110_000]);
    }

    #[test]
    fn test_max_tier_wins_over_resume_margin() {
        let (_observers, mut registry) = build(&[ObserverSettings::new(
            100_000, 120_000, 0, false, "a",
        )]);
        registry.configs_mut()[0].allocated_bitrate_bps = Some(0);
        registry.configs_mut()[0].paused = true;
        registry.configs_mut()[0].media_ratio = 0.5;

        // The resume bitrate is 170k, above the max
        let (tier, allocation) =
            allocate_with_tiers(130_000, &registry, &AllocatorConfig::default());
        assert_eq!(tier, AllocationTier::Max);
        assert_eq!(allocation, vec![120_000]);
    }

    #[test]
    fn test_distribute_evenly_orders_by_headroom() {
        let (_observers, registry) = build(&[
            ObserverSettings::new(0, 1_000, 0, false, "a"),
            ObserverSettings::new(0, 500, 0, false, "b"),
        ]);
        // a has 100 left, b has 500 left
        let mut allocation = vec![900, 0];
        let leftover = distribute_evenly(
            registry.configs(),
            600,
            true,
            1,
            DistributionCap::MaxBitrate,
            &mut allocation,
        );
        assert_eq!(leftover, 0);
        assert_eq!(allocation, vec![1_000, 500]);
    }
}
