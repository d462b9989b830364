//! Bitrate allocation for real-time media send streams
//!
//! This crate splits one aggregate bandwidth estimate across any number of
//! send streams, each with its own minimum, maximum and padding target:
//! - Tiered allocation (zero, low, normal, max estimates)
//! - Fair-share distribution of surplus bitrate
//! - Pause/resume hysteresis for streams whose minimum cannot be met
//! - Aggregate send limits for the pacer
//! - Pluggable allocation strategies
//!
//! The allocator is synchronous and lock-free. Observers are notified from
//! within the calling sequence.
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


pub mod error;
pub mod config;
pub mod observer;
pub mod registry;
pub mod strategy;
pub mod hysteresis;
pub mod allocation;
pub mod limits;
pub mod sequence_checker;
pub mod allocator;

// Re-export main types
pub use error::{AllocatorError, AllocatorResult};
pub use config::AllocatorConfig;
pub use observer::{BitrateAllocatorObserver, LimitObserver};
pub use registry::{ObserverConfig, ObserverHandle, ObserverRegistry, ObserverSettings};
pub use strategy::{
    AudioPriorityStrategy, BitrateAllocationStrategy, TrackConfig,
};
pub use hysteresis::{PauseTracker, PauseTransition};
pub use allocation::{AllocationTier, DistributionCap};
pub use limits::AllocationLimits;
pub use sequence_checker::SequenceChecker;
pub use allocator::{best_guess_start_bitrate, BitrateAllocator};
