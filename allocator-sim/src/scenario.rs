//! Scenario files and their replay through the allocator
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



use anyhow::{anyhow, bail, Context, Result};
use bitrate_allocator::{
    AllocationLimits, AllocatorConfig, AudioPriorityStrategy, BitrateAllocationStrategy,
    BitrateAllocator, BitrateAllocatorObserver, LimitObserver, ObserverSettings,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A send stream taking part in a scenario
#[derive(Debug, Clone, Deserialize)]
pub struct StreamSpec {
    pub id: String,
    #[serde(default)]
    pub min_bitrate_bps: u32,
    #[serde(default)]
    pub max_bitrate_bps: u32,
    #[serde(default)]
    pub pad_up_bitrate_bps: u32,
    #[serde(default)]
    pub enforce_min_bitrate: bool,
    /// Share of each allocation the stream spends on FEC and retransmissions
    #[serde(default)]
    pub protection_ratio: f64,
}

impl StreamSpec {
    fn settings(&self) -> ObserverSettings {
        ObserverSettings::new(
            self.min_bitrate_bps,
            self.max_bitrate_bps,
            self.pad_up_bitrate_bps,
            self.enforce_min_bitrate,
            self.id.clone(),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkEstimate {
    pub bitrate_bps: u32,
    #[serde(default)]
    pub fraction_loss: u8,
    #[serde(default)]
    pub rtt_ms: i64,
    #[serde(default)]
    pub bwe_period_ms: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategySpec {
    AudioPriority {
        audio_track_id: String,
        sufficient_audio_bitrate_bps: u32,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Register a stream by id
    Add(String),
    /// Replace the constraints of a registered stream
    Update(StreamSpec),
    Remove(String),
    Network(NetworkEstimate),
    Strategy(Option<StrategySpec>),
}

impl Step {
    fn action(&self) -> &'static str {
        match self {
            Step::Add(_) => "add",
            Step::Update(_) => "update",
            Step::Remove(_) => "remove",
            Step::Network(_) => "network",
            Step::Strategy(_) => "strategy",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub streams: Vec<StreamSpec>,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_json(json: &str) -> Result<Self> {
        let scenario: Scenario = serde_json::from_str(json).context("Invalid scenario")?;
        let mut ids = HashSet::new();
        for stream in &scenario.streams {
            if !ids.insert(stream.id.as_str()) {
                bail!("Duplicate stream id: {}", stream.id);
            }
        }
        Ok(scenario)
    }
}

/// State after one step
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StepReport {
    pub step: usize,
    pub action: &'static str,
    pub target_bitrate_bps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_bitrate_bps: Option<u32>,
    /// Last bitrate handed to each registered stream
    pub allocations: BTreeMap<String, Option<u32>>,
    pub min_send_bitrate_bps: u32,
    pub max_padding_bitrate_bps: u32,
    pub pause_events: u32,
}

/// Stream observer reporting a share of its allocation as protection
struct SimObserver {
    protection_ratio: Mutex<f64>,
    last_bitrate_bps: Mutex<Option<u32>>,
}

impl SimObserver {
    fn new(protection_ratio: f64) -> Self {
        SimObserver {
            protection_ratio: Mutex::new(protection_ratio),
            last_bitrate_bps: Mutex::new(None),
        }
    }

    fn set_protection_ratio(&self, protection_ratio: f64) {
        if let Ok(mut ratio) = self.protection_ratio.lock() {
            *ratio = protection_ratio;
        }
    }

    fn last_bitrate(&self) -> Option<u32> {
        self.last_bitrate_bps.lock().ok().and_then(|last| *last)
    }
}

impl BitrateAllocatorObserver for SimObserver {
    fn on_bitrate_updated(
        &self,
        bitrate_bps: u32,
        fraction_loss: u8,
        rtt_ms: i64,
        _bwe_period_ms: i64,
    ) -> u32 {
        if let Ok(mut last) = self.last_bitrate_bps.lock() {
            *last = Some(bitrate_bps);
        }
        let protection_ratio = self.protection_ratio.lock().map(|ratio| *ratio).unwrap_or(0.0);
        let protection_bps = (bitrate_bps as f64 * protection_ratio.clamp(0.0, 1.0)) as u32;
        debug!(bitrate_bps, fraction_loss, rtt_ms, protection_bps, "Stream updated");
        protection_bps
    }
}

#[derive(Default)]
struct SimLimitObserver {
    last: Mutex<AllocationLimits>,
}

impl LimitObserver for SimLimitObserver {
    fn on_allocation_limits_changed(&self, min_send_bitrate_bps: u32, max_padding_bitrate_bps: u32) {
        if let Ok(mut last) = self.last.lock() {
            *last = AllocationLimits {
                min_send_bitrate_bps,
                max_padding_bitrate_bps,
            };
        }
    }
}

struct SimStream {
    spec: StreamSpec,
    observer: Arc<SimObserver>,
}

/// Replays scenario steps against one allocator
pub struct Simulation {
    allocator: BitrateAllocator,
    limits: Arc<SimLimitObserver>,
    streams: Vec<SimStream>,
    steps_run: usize,
}

impl Simulation {
    pub fn new(scenario: &Scenario, config: AllocatorConfig) -> Self {
        let limits = Arc::new(SimLimitObserver::default());
        let streams = scenario
            .streams
            .iter()
            .map(|spec| SimStream {
                spec: spec.clone(),
                observer: Arc::new(SimObserver::new(spec.protection_ratio)),
            })
            .collect();

        Simulation {
            allocator: BitrateAllocator::with_config(limits.clone(), config),
            limits,
            streams,
            steps_run: 0,
        }
    }

    /// Run every step of `scenario` on a fresh allocator
    pub fn run(scenario: &Scenario, config: AllocatorConfig) -> Result<Vec<StepReport>> {
        let mut simulation = Simulation::new(scenario, config);
        scenario
            .steps
            .iter()
            .map(|step| simulation.apply(step))
            .collect()
    }

    pub fn apply(&mut self, step: &Step) -> Result<StepReport> {
        let start_bitrate_bps = match step {
            Step::Add(id) => {
                let stream = self.stream(id)?;
                let (observer, settings) = (stream.observer.clone(), stream.spec.settings());
                Some(self.allocator.add_observer(&observer, settings)?)
            }
            Step::Update(spec) => {
                let index = self.index(&spec.id)?;
                let observer = self.streams[index].observer.clone();
                let start_bitrate_bps = self.allocator.update_observer(&observer, spec.settings())?;
                // Takes effect from the next allocation on
                observer.set_protection_ratio(spec.protection_ratio);
                self.streams[index].spec = spec.clone();
                Some(start_bitrate_bps)
            }
            Step::Remove(id) => {
                let observer = self.stream(id)?.observer.clone();
                if !self.allocator.remove_observer(&observer) {
                    bail!("Stream {} is not registered", id);
                }
                None
            }
            Step::Network(estimate) => {
                self.allocator.on_network_changed(
                    estimate.bitrate_bps,
                    estimate.fraction_loss,
                    estimate.rtt_ms,
                    estimate.bwe_period_ms,
                );
                None
            }
            Step::Strategy(spec) => {
                let strategy = spec.as_ref().map(|spec| match spec {
                    StrategySpec::AudioPriority {
                        audio_track_id,
                        sufficient_audio_bitrate_bps,
                    } => Box::new(AudioPriorityStrategy::new(
                        audio_track_id.clone(),
                        *sufficient_audio_bitrate_bps,
                    )) as Box<dyn BitrateAllocationStrategy>,
                });
                self.allocator.set_strategy(strategy);
                None
            }
        };

        self.steps_run += 1;
        Ok(self.report(step.action(), start_bitrate_bps))
    }

    fn report(&self, action: &'static str, start_bitrate_bps: Option<u32>) -> StepReport {
        let allocations = self
            .streams
            .iter()
            .filter(|stream| self.allocator.is_registered(&stream.observer))
            .map(|stream| (stream.spec.id.clone(), stream.observer.last_bitrate()))
            .collect();
        let limits = self.limits.last.lock().map(|last| *last).unwrap_or_default();

        StepReport {
            step: self.steps_run,
            action,
            target_bitrate_bps: self.allocator.last_bitrate_bps(),
            start_bitrate_bps,
            allocations,
            min_send_bitrate_bps: limits.min_send_bitrate_bps,
            max_padding_bitrate_bps: limits.max_padding_bitrate_bps,
            pause_events: self.allocator.num_pause_events(),
        }
    }

    fn index(&self, id: &str) -> Result<usize> {
        self.streams
            .iter()
            .position(|stream| stream.spec.id == id)
            .ok_or_else(|| anyhow!("Unknown stream: {}", id))
    }

    fn stream(&self, id: &str) -> Result<&SimStream> {
        Ok(&self.streams[self.index(id)?])
    }
}
