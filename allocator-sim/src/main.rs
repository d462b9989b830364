//! Allocator simulator
//!
//! Replays a scenario of stream registrations and bandwidth estimates through
//! the bitrate allocator and prints the state after every step as JSON lines.
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



mod scenario;

use allocator_config::AppConfig;
use allocator_logging::LogFormat;
use anyhow::{Context, Result};
use clap::Parser;
use scenario::{Scenario, Simulation};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "allocator-sim",
    version,
    about = "Replay bandwidth scenarios through the bitrate allocator"
)]
struct Cli {
    /// Scenario file (JSON)
    scenario: PathBuf,

    /// Allocator tuning file (TOML or JSON), overridden by ALLOCATOR_* variables
    #[arg(long, env = "ALLOCATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Log as JSON lines instead of plain text
    #[arg(long)]
    json_logs: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let format = if cli.json_logs || config.log_json {
        LogFormat::Json
    } else {
        LogFormat::Console
    };
    allocator_logging::init(format, "allocator-sim", config.log_level());

    let json = std::fs::read_to_string(&cli.scenario)
        .with_context(|| format!("Failed to read {}", cli.scenario.display()))?;
    let scenario = Scenario::from_json(&json)?;
    info!(
        streams = scenario.streams.len(),
        steps = scenario.steps.len(),
        "Replaying scenario"
    );

    let reports = Simulation::run(&scenario, config.allocator)?;

    let mut stdout = io::stdout().lock();
    for report in &reports {
        serde_json::to_writer(&mut stdout, report)?;
        writeln!(stdout)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse() {
        let cli = Cli::try_parse_from(["allocator-sim", "call.json", "--json-logs"]).unwrap();
        assert_eq!(cli.scenario, PathBuf::from("call.json"));
        assert!(cli.json_logs);
    }
}
