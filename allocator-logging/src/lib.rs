//! Tracing setup for the allocator tools
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



use serde::Deserialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of the log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON lines, one object per event
    Json,
    /// Human-readable lines
    #[default]
    Console,
}

/// Filter from `RUST_LOG`, or `default_level` when it is unset or invalid
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize logging in the requested format
///
/// Logs go to stderr, leaving stdout to the tool's own output.
pub fn init(format: LogFormat, component: &str, default_level: &str) {
    match format {
        LogFormat::Json => init_logging(component, default_level),
        LogFormat::Console => init_console_logging(component, default_level),
    }
}

/// Initialize JSON logging
///
/// Events carry their target, file and line so allocation decisions can be
/// traced back when replaying a trace.
pub fn init_logging(component: &str, default_level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    tracing::info!(component, "Logging initialized");
}

/// Initialize console logging (for development)
pub fn init_console_logging(component: &str, default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(component, "Console logging initialized");
}
