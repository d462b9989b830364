//! Shared test observers

#![allow(dead_code)]

use bitrate_allocator::{BitrateAllocatorObserver, LimitObserver};
use std::sync::Mutex;

/// One `on_bitrate_updated` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Update {
    pub bitrate_bps: u32,
    pub fraction_loss: u8,
    pub rtt_ms: i64,
    pub bwe_period_ms: i64,
}

/// Records every update and reports a fixed protection bitrate
#[derive(Default)]
pub struct RecordingObserver {
    pub protection_bps: u32,
    updates: Mutex<Vec<Update>>,
}

impl RecordingObserver {
    pub fn with_protection(protection_bps: u32) -> Self {
        RecordingObserver {
            protection_bps,
            ..Default::default()
        }
    }

    pub fn updates(&self) -> Vec<Update> {
        self.updates.lock().unwrap().clone()
    }

    pub fn last_bitrate(&self) -> Option<u32> {
        self.updates.lock().unwrap().last().map(|u| u.bitrate_bps)
    }

    pub fn update_count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }
}

impl BitrateAllocatorObserver for RecordingObserver {
    fn on_bitrate_updated(
        &self,
        bitrate_bps: u32,
        fraction_loss: u8,
        rtt_ms: i64,
        bwe_period_ms: i64,
    ) -> u32 {
        self.updates.lock().unwrap().push(Update {
            bitrate_bps,
            fraction_loss,
            rtt_ms,
            bwe_period_ms,
        });
        self.protection_bps.min(bitrate_bps)
    }
}

/// Records every limit change
#[derive(Default)]
pub struct RecordingLimitObserver {
    calls: Mutex<Vec<(u32, u32)>>,
}

impl RecordingLimitObserver {
    pub fn calls(&self) -> Vec<(u32, u32)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<(u32, u32)> {
        self.calls.lock().unwrap().last().copied()
    }
}

impl LimitObserver for RecordingLimitObserver {
    fn on_allocation_limits_changed(&self, min_send_bitrate_bps: u32, max_padding_bitrate_bps: u32) {
        self.calls
            .lock()
            .unwrap()
            .push((min_send_bitrate_bps, max_padding_bitrate_bps));
    }
}
