//! Collaborator interfaces
//!
//! Send streams receive their share through [`BitrateAllocatorObserver`]; the
//! transport learns about aggregate send limits through [`LimitObserver`].
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


/// Receives bitrate allocations for one send stream.
///
/// Called synchronously from within the allocator. Implementations must not
/// call back into the allocator.
pub trait BitrateAllocatorObserver {
    /// Apply `bitrate_bps` (0 means the stream is paused) and return the part
    /// of it the stream spends on protection (FEC, retransmissions), in bps.
    fn on_bitrate_updated(
        &self,
        bitrate_bps: u32,
        fraction_loss: u8,
        rtt_ms: i64,
        bwe_period_ms: i64,
    ) -> u32;
}

/// Notified when the minimum send bitrate or the padding budget changes.
pub trait LimitObserver {
    fn on_allocation_limits_changed(&self, min_send_bitrate_bps: u32, max_padding_bitrate_bps: u32);
}
