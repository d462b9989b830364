//! Bitrate allocator
//!
//! Splits the bandwidth estimate across registered send streams and pushes
//! each stream its share together with the current loss and RTT.
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


use crate::allocation::{allocate_with_tiers, zero_rate_allocation, AllocationTier};
use crate::config::AllocatorConfig;
use crate::error::{AllocatorError, AllocatorResult};
use crate::hysteresis::{media_ratio, PauseTracker, PauseTransition};
use crate::limits::{AllocationLimits, LimitsPublisher};
use crate::observer::{BitrateAllocatorObserver, LimitObserver};
use crate::registry::{observer_handle, ObserverConfig, ObserverHandle, ObserverRegistry, ObserverSettings};
use crate::sequence_checker::SequenceChecker;
use crate::strategy::BitrateAllocationStrategy;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Start bitrate for a stream that has no allocation of its own yet: an even
/// split of the last nonzero estimate across `observer_count` streams.
pub fn best_guess_start_bitrate(last_non_zero_bitrate_bps: u32, observer_count: usize) -> u32 {
    if observer_count == 0 {
        return last_non_zero_bitrate_bps;
    }
    (last_non_zero_bitrate_bps as u64 / observer_count as u64) as u32
}

/// Bitrate allocator
///
/// All methods must be called from one sequence; debug builds assert it.
pub struct BitrateAllocator {
    config: AllocatorConfig,
    sequence_checker: SequenceChecker,
    registry: ObserverRegistry,
    limits: LimitsPublisher,
    pause_tracker: PauseTracker,
    strategy: Option<Box<dyn BitrateAllocationStrategy>>,
    last_bitrate_bps: u32,
    last_non_zero_bitrate_bps: u32,
    last_fraction_loss: u8,
    last_rtt_ms: i64,
    last_bwe_period_ms: i64,
    last_bwe_log: Option<Instant>,
}

impl BitrateAllocator {
    /// Create a new allocator with default tuning
    pub fn new(limit_observer: Arc<dyn LimitObserver>) -> Self {
        Self::with_config(limit_observer, AllocatorConfig::default())
    }

    /// Create a new allocator
    pub fn with_config(limit_observer: Arc<dyn LimitObserver>, config: AllocatorConfig) -> Self {
        let last_non_zero_bitrate_bps = config.default_start_bitrate_bps;
        BitrateAllocator {
            config,
            sequence_checker: SequenceChecker::new(),
            registry: ObserverRegistry::new(),
            limits: LimitsPublisher::new(limit_observer),
            pause_tracker: PauseTracker::new(),
            strategy: None,
            last_bitrate_bps: 0,
            last_non_zero_bitrate_bps,
            last_fraction_loss: 0,
            last_rtt_ms: 0,
            last_bwe_period_ms: 0,
            last_bwe_log: None,
        }
    }

    /// Allocate `target_bitrate_bps` across the registered observers.
    ///
    /// Every observer is notified, even if its share did not change, since
    /// loss and RTT may have.
    pub fn on_network_changed(
        &mut self,
        target_bitrate_bps: u32,
        fraction_loss: u8,
        rtt_ms: i64,
        bwe_period_ms: i64,
    ) {
        self.check_sequence();

        self.last_bitrate_bps = target_bitrate_bps;
        if target_bitrate_bps > 0 {
            self.last_non_zero_bitrate_bps = target_bitrate_bps;
        }
        self.last_fraction_loss = fraction_loss;
        self.last_rtt_ms = rtt_ms;
        self.last_bwe_period_ms = bwe_period_ms;
        self.log_bwe(target_bitrate_bps);

        let (tier, allocation) = self.allocate_bitrates(target_bitrate_bps);
        self.apply_allocation(&allocation, tier, target_bitrate_bps);
        self.update_allocation_limits(false);
    }

    /// Register `observer` and return its start bitrate.
    ///
    /// With a nonzero estimate the allocation is recomputed with the new
    /// observer included and every observer is notified. Otherwise only the
    /// new observer is told it may not send yet, and the returned bitrate is a
    /// best guess.
    pub fn add_observer<O>(
        &mut self,
        observer: &Arc<O>,
        settings: ObserverSettings,
    ) -> AllocatorResult<u32>
    where
        O: BitrateAllocatorObserver + 'static,
    {
        self.check_sequence();

        let handle = observer_handle(observer);
        if self.registry.contains(&handle) {
            warn!(track_id = %settings.track_id, "Observer already registered");
            return Err(AllocatorError::ObserverAlreadyRegistered {
                track_id: settings.track_id,
            });
        }

        debug!(
            track_id = %settings.track_id,
            min_bitrate_bps = settings.min_bitrate_bps,
            max_bitrate_bps = settings.max_bitrate_bps,
            pad_up_bitrate_bps = settings.pad_up_bitrate_bps,
            enforce_min_bitrate = settings.enforce_min_bitrate,
            "Adding observer"
        );
        self.registry.push(ObserverConfig::new(handle.clone(), settings));

        let start_bitrate = self.allocate_for_new_settings(&handle);
        self.update_allocation_limits(true);
        Ok(start_bitrate)
    }

    /// Change the constraints of a registered observer and return its new
    /// bitrate. Registration order is kept.
    pub fn update_observer<O>(
        &mut self,
        observer: &Arc<O>,
        settings: ObserverSettings,
    ) -> AllocatorResult<u32>
    where
        O: BitrateAllocatorObserver + 'static,
    {
        self.check_sequence();

        let handle = observer_handle(observer);
        let Some(config) = self.registry.get_mut(&handle) else {
            return Err(AllocatorError::ObserverNotFound {
                track_id: settings.track_id,
            });
        };
        config.apply_settings(settings);

        let start_bitrate = self.allocate_for_new_settings(&handle);
        self.update_allocation_limits(true);
        Ok(start_bitrate)
    }

    /// Unregister `observer` without reallocating.
    ///
    /// Remaining observers keep their current bitrate until the next estimate.
    /// Returns false if the observer was not registered.
    pub fn remove_observer<O>(&mut self, observer: &Arc<O>) -> bool
    where
        O: BitrateAllocatorObserver + 'static,
    {
        self.check_sequence();

        let Some(removed) = self.registry.remove(&observer_handle(observer)) else {
            return false;
        };
        debug!(track_id = removed.track_id(), "Removed observer");
        self.update_allocation_limits(true);
        true
    }

    /// Last allocation of `observer`, or a best guess if it has none
    pub fn start_bitrate<O>(&self, observer: &Arc<O>) -> u32
    where
        O: BitrateAllocatorObserver + 'static,
    {
        self.check_sequence();
        self.start_bitrate_of(&observer_handle(observer))
    }

    /// Replace the built-in tiers with `strategy`, or restore them with `None`
    pub fn set_strategy(&mut self, strategy: Option<Box<dyn BitrateAllocationStrategy>>) {
        self.check_sequence();
        debug!(external = strategy.is_some(), "Allocation strategy changed");
        self.strategy = strategy;
    }

    pub fn has_strategy(&self) -> bool {
        self.strategy.is_some()
    }

    /// Last allocation handed to `observer`
    pub fn allocated_bitrate<O>(&self, observer: &Arc<O>) -> Option<u32>
    where
        O: BitrateAllocatorObserver + 'static,
    {
        self.registry
            .get(&observer_handle(observer))
            .and_then(|config| config.allocated_bitrate_bps)
    }

    pub fn is_registered<O>(&self, observer: &Arc<O>) -> bool
    where
        O: BitrateAllocatorObserver + 'static,
    {
        self.registry.contains(&observer_handle(observer))
    }

    pub fn observer_count(&self) -> usize {
        self.registry.len()
    }

    /// Number of pauses caused by a too low estimate
    pub fn num_pause_events(&self) -> u32 {
        self.pause_tracker.num_pause_events()
    }

    pub fn last_allocation_limits(&self) -> Option<AllocationLimits> {
        self.limits.last_published()
    }

    pub fn last_bitrate_bps(&self) -> u32 {
        self.last_bitrate_bps
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Let the next call bind the allocator to a new sequence, after handing
    /// it over to another thread.
    pub fn detach_from_sequence(&mut self) {
        self.sequence_checker.detach();
    }

    fn check_sequence(&self) {
        debug_assert!(
            self.sequence_checker.is_current(),
            "BitrateAllocator used outside of its sequence"
        );
    }

    fn allocate_for_new_settings(&mut self, handle: &ObserverHandle) -> u32 {
        if self.last_bitrate_bps > 0 {
            let target_bitrate_bps = self.last_bitrate_bps;
            let (tier, allocation) = self.allocate_bitrates(target_bitrate_bps);
            self.apply_allocation(&allocation, tier, target_bitrate_bps);
            return self
                .registry
                .get(handle)
                .and_then(|config| config.allocated_bitrate_bps)
                .unwrap_or(0);
        }

        // No estimate, the encoder may not produce frames yet
        if let Some(observer) = handle.upgrade() {
            observer.on_bitrate_updated(
                0,
                self.last_fraction_loss,
                self.last_rtt_ms,
                self.last_bwe_period_ms,
            );
        }
        self.start_bitrate_of(handle)
    }

    fn start_bitrate_of(&self, handle: &ObserverHandle) -> u32 {
        match self.registry.get(handle) {
            None => best_guess_start_bitrate(self.last_non_zero_bitrate_bps, self.registry.len() + 1),
            Some(config) => config.allocated_bitrate_bps.unwrap_or_else(|| {
                best_guess_start_bitrate(self.last_non_zero_bitrate_bps, self.registry.len())
            }),
        }
    }

    /// Compute the allocation for `target_bitrate_bps`, together with the
    /// built-in tier that produced it (`None` when a strategy was used).
    fn allocate_bitrates(
        &mut self,
        target_bitrate_bps: u32,
    ) -> (Option<AllocationTier>, Vec<u32>) {
        if self.registry.is_empty() {
            return (None, Vec::new());
        }
        if target_bitrate_bps == 0 {
            return (
                Some(AllocationTier::Zero),
                zero_rate_allocation(self.registry.configs()),
            );
        }

        if let Some(strategy) = self.strategy.as_mut() {
            let track_configs = self.registry.track_configs();
            let mut allocation = strategy.allocate_bitrates(target_bitrate_bps, &track_configs);
            if allocation.len() != track_configs.len() {
                warn!(
                    expected = track_configs.len(),
                    actual = allocation.len(),
                    "Allocation strategy returned wrong number of tracks"
                );
                allocation.resize(track_configs.len(), 0);
            }
            return (None, allocation);
        }

        let (tier, allocation) =
            allocate_with_tiers(target_bitrate_bps, &self.registry, &self.config);
        debug!(
            ?tier,
            target_bitrate_bps,
            observers = self.registry.len(),
            "Allocated bitrate"
        );
        (Some(tier), allocation)
    }

    fn apply_allocation(
        &mut self,
        allocation: &[u32],
        tier: Option<AllocationTier>,
        target_bitrate_bps: u32,
    ) {
        let fraction_loss = self.last_fraction_loss;
        let rtt_ms = self.last_rtt_ms;
        let bwe_period_ms = self.last_bwe_period_ms;
        // A low tier grant keeps the stream under resume hysteresis
        let release_pause = tier != Some(AllocationTier::Low);

        for (config, &allocated) in self.registry.configs_mut().iter_mut().zip(allocation) {
            let protection_bps = match config.observer() {
                Some(observer) => {
                    observer.on_bitrate_updated(allocated, fraction_loss, rtt_ms, bwe_period_ms)
                }
                None => {
                    warn!(track_id = config.track_id(), "Observer dropped without being removed");
                    0
                }
            };

            match self
                .pause_tracker
                .record(config, allocated, target_bitrate_bps, release_pause)
            {
                PauseTransition::Paused => {
                    // Estimated from the media ratio the stream had before pausing
                    let predicted_protection_bps =
                        ((1.0 - config.media_ratio) * config.min_bitrate_bps() as f64) as u32;
                    info!(
                        track_id = config.track_id(),
                        min_bitrate_bps = config.min_bitrate_bps(),
                        target_bitrate_bps,
                        predicted_protection_bps,
                        "Pausing observer"
                    );
                }
                PauseTransition::NetworkDown => {
                    debug!(track_id = config.track_id(), "Observer stopped, estimate is zero");
                }
                PauseTransition::Resumed => {
                    info!(
                        track_id = config.track_id(),
                        min_bitrate_bps = config.min_bitrate_bps(),
                        allocated_bitrate_bps = allocated,
                        protection_bitrate_bps = protection_bps,
                        "Resuming observer"
                    );
                }
                PauseTransition::Unchanged => {}
            }

            // Frozen while paused
            if allocated > 0 && !config.paused {
                config.media_ratio = media_ratio(allocated, protection_bps);
            }
            config.allocated_bitrate_bps = Some(allocated);
        }
    }

    fn update_allocation_limits(&mut self, force: bool) {
        let limits = AllocationLimits::from_configs(self.registry.configs(), &self.config);
        if force {
            self.limits.publish(limits);
        } else {
            self.limits.publish_if_changed(limits);
        }
    }

    fn log_bwe(&mut self, target_bitrate_bps: u32) {
        let now = Instant::now();
        let due = self
            .last_bwe_log
            .map_or(true, |last| now.duration_since(last) >= self.config.bwe_log_interval());
        if due {
            info!(target_bitrate_bps, "Current BWE");
            self.last_bwe_log = Some(now);
        }
    }
}

impl Drop for BitrateAllocator {
    fn drop(&mut self) {
        info!(
            num_pause_events = self.pause_tracker.num_pause_events(),
            "Bitrate allocator dropped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct TestObserver {
        protection_bps: u32,
        updates: Mutex<Vec<u32>>,
    }

    impl TestObserver {
        fn last(&self) -> Option<u32> {
            self.updates.lock().unwrap().last().copied()
        }

        fn count(&self) -> usize {
            self.updates.lock().unwrap().len()
        }
    }

    impl BitrateAllocatorObserver for TestObserver {
        fn on_bitrate_updated(&self, bitrate_bps: u32, _: u8, _: i64, _: i64) -> u32 {
            self.updates.lock().unwrap().push(bitrate_bps);
            self.protection_bps.min(bitrate_bps)
        }
    }

    #[derive(Default)]
    struct TestLimitObserver {
        calls: Mutex<Vec<(u32, u32)>>,
    }

    impl LimitObserver for TestLimitObserver {
        fn on_allocation_limits_changed(&self, min_send: u32, max_padding: u32) {
            self.calls.lock().unwrap().push((min_send, max_padding));
        }
    }

    fn allocator() -> (BitrateAllocator, Arc<TestLimitObserver>) {
        let limits = Arc::new(TestLimitObserver::default());
        (BitrateAllocator::new(limits.clone()), limits)
    }

    #[test]
    fn test_best_guess_start_bitrate() {
        assert_eq!(best_guess_start_bitrate(300_000, 0), 300_000);
        assert_eq!(best_guess_start_bitrate(300_000, 3), 100_000);
    }

    #[test]
    fn test_add_before_any_estimate() {
        let (mut allocator, limits) = allocator();
        let observer = Arc::new(TestObserver::default());

        let start = allocator
            .add_observer(&observer, ObserverSettings::new(100_000, 1_500_000, 0, true, "v"))
            .unwrap();

        // Default start bitrate split across one observer, told to stay quiet
        assert_eq!(start, 300_000);
        assert_eq!(observer.last(), Some(0));
        assert_eq!(allocator.allocated_bitrate(&observer), None);
        assert_eq!(*limits.calls.lock().unwrap(), vec![(100_000, 0)]);
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let (mut allocator, limits) = allocator();
        let observer = Arc::new(TestObserver::default());
        let settings = ObserverSettings::new(100_000, 1_500_000, 0, true, "v");

        allocator.add_observer(&observer, settings.clone()).unwrap();
        let err = allocator.add_observer(&observer, settings).unwrap_err();

        assert!(matches!(err, AllocatorError::ObserverAlreadyRegistered { .. }));
        assert_eq!(allocator.observer_count(), 1);
        assert_eq!(limits.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_start_bitrate_guesses() {
        let (mut allocator, _limits) = allocator();
        let a = Arc::new(TestObserver::default());
        let b = Arc::new(TestObserver::default());

        // Not registered: share with the one that would be added
        assert_eq!(allocator.start_bitrate(&a), 300_000);

        allocator
            .add_observer(&a, ObserverSettings::new(0, 0, 0, false, "a"))
            .unwrap();
        assert_eq!(allocator.start_bitrate(&a), 300_000);
        assert_eq!(allocator.start_bitrate(&b), 150_000);

        allocator.on_network_changed(200_000, 0, 0, 0);
        assert_eq!(allocator.start_bitrate(&a), 200_000);
    }

    #[test]
    fn test_update_observer_keeps_position_and_reallocates() {
        let (mut allocator, _limits) = allocator();
        let a = Arc::new(TestObserver::default());
        let b = Arc::new(TestObserver::default());
        allocator
            .add_observer(&a, ObserverSettings::new(100_000, 200_000, 0, false, "a"))
            .unwrap();
        allocator
            .add_observer(&b, ObserverSettings::new(100_000, 200_000, 0, false, "b"))
            .unwrap();
        allocator.on_network_changed(500_000, 0, 0, 0);
        assert_eq!(a.last(), Some(200_000));

        let bitrate = allocator
            .update_observer(&a, ObserverSettings::new(100_000, 300_000, 0, false, "a"))
            .unwrap();
        assert_eq!(bitrate, 300_000);
        assert_eq!(b.last(), Some(200_000));
    }

    #[test]
    fn test_update_unknown_observer() {
        let (mut allocator, _limits) = allocator();
        let a = Arc::new(TestObserver::default());
        let result = allocator.update_observer(&a, ObserverSettings::default());
        assert!(matches!(result, Err(AllocatorError::ObserverNotFound { .. })));
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let (mut allocator, limits) = allocator();
        let a = Arc::new(TestObserver::default());
        assert!(!allocator.remove_observer(&a));
        assert!(limits.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_media_ratio_feeds_hysteresis() {
        let (mut allocator, _limits) = allocator();
        let observer = Arc::new(TestObserver {
            protection_bps: 50_000,
            ..Default::default()
        });
        allocator
            .add_observer(&observer, ObserverSettings::new(100_000, 400_000, 0, false, "v"))
            .unwrap();

        allocator.on_network_changed(200_000, 0, 0, 0);
        assert_eq!(observer.last(), Some(200_000));

        allocator.on_network_changed(90_000, 0, 0, 0);
        assert_eq!(observer.last(), Some(0));
        assert_eq!(allocator.num_pause_events(), 1);

        // 25% protection on top of min plus margin: 150k to resume
        allocator.on_network_changed(149_999, 0, 0, 0);
        assert_eq!(observer.last(), Some(0));
        allocator.on_network_changed(150_000, 0, 0, 0);
        assert_eq!(observer.last(), Some(150_000));
        assert_eq!(allocator.num_pause_events(), 1);
    }

    #[test]
    fn test_dropped_observer_is_skipped() {
        let (mut allocator, _limits) = allocator();
        let a = Arc::new(TestObserver::default());
        let b = Arc::new(TestObserver::default());
        allocator
            .add_observer(&a, ObserverSettings::new(0, 100_000, 0, false, "a"))
            .unwrap();
        allocator
            .add_observer(&b, ObserverSettings::new(0, 100_000, 0, false, "b"))
            .unwrap();
        drop(a);

        allocator.on_network_changed(150_000, 0, 0, 0);
        assert_eq!(b.count(), 2);
        assert_eq!(b.last(), Some(75_000));
    }
}
