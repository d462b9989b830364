//! Configuration loading for the allocator tools
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



use bitrate_allocator::AllocatorConfig;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use thiserror::Error;

/// Prefix of the environment variables overriding allocator tuning,
/// e.g. `ALLOCATOR_TOGGLE_FACTOR=0.2`
pub const ENV_PREFIX: &str = "ALLOCATOR";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    pub allocator: AllocatorConfig,
    pub log_level: Option<String>,
    pub log_json: bool,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        Self::load(None)
    }

    /// Load configuration from `file` and environment variables
    pub fn load(file: Option<&Path>) -> ConfigResult<Self> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();
        Self::from_sources(file, None)
    }

    /// Load allocator tuning from an optional TOML/JSON file, overridden by
    /// `ALLOCATOR_*` variables.
    ///
    /// `env_override` replaces the process environment, for tests.
    pub fn from_sources(
        file: Option<&Path>,
        env_override: Option<HashMap<String, String>>,
    ) -> ConfigResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            let format = match path.extension().and_then(|ext| ext.to_str()) {
                Some("json") => FileFormat::Json,
                _ => FileFormat::Toml,
            };
            builder = builder.add_source(File::from(path).format(format));
        }

        let lookup = |key: &str| match &env_override {
            Some(vars) => vars.get(key).cloned(),
            None => env::var(key).ok(),
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(env_override.clone()),
        );

        let allocator: AllocatorConfig = builder.build()?.try_deserialize()?;
        validate(&allocator)?;

        let log_json =
            lookup("LOG_FORMAT").is_some_and(|format| format.eq_ignore_ascii_case("json"));

        Ok(Self {
            allocator,
            log_level: lookup("LOG_LEVEL"),
            log_json,
        })
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}

fn validate(config: &AllocatorConfig) -> ConfigResult<()> {
    if config.toggle_factor.is_nan() || config.toggle_factor < 0.0 {
        return Err(ConfigError::Invalid(format!(
            "toggle_factor must be non-negative, got {}",
            config.toggle_factor
        )));
    }
    if config.transmission_max_bitrate_multiplier == 0 {
        return Err(ConfigError::Invalid(
            "transmission_max_bitrate_multiplier must be at least 1".to_string(),
        ));
    }
    Ok(())
}
