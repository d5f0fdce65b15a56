//! Configuration management for Nimbus
//!
//! This module handles loading, parsing, and validating configuration
//! from a YAML file, with sensible defaults for every field so an empty
//! or missing file yields a working configuration.

use crate::error::{NimbusError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Main configuration structure for Nimbus
///
/// Holds the agent endpoint settings, chat state storage location, and
/// submission rate limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Agent endpoint configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Chat state storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Message submission rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Agent endpoint configuration
///
/// Everything needed to build the request body for a user turn and to
/// reach the hosted agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// URL of the agent streaming endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Run identifier sent with every request
    #[serde(default = "default_run_id")]
    pub run_id: String,

    /// Resource identifier sent with every request
    #[serde(default = "default_resource_id")]
    pub resource_id: String,

    /// Server-side retry budget for a turn
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Maximum agent steps per turn
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Nucleus sampling parameter
    #[serde(default = "default_top_p")]
    pub top_p: f64,

    /// Overall request timeout in seconds (covers the full stream)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Extra headers attached to every request
    #[serde(default = "default_extra_headers")]
    pub extra_headers: HashMap<String, String>,
}

fn default_endpoint() -> String {
    "https://millions-screeching-vultur.mastra.cloud/api/agents/weatherAgent/stream".to_string()
}

fn default_run_id() -> String {
    "weatherAgent".to_string()
}

fn default_resource_id() -> String {
    "weatherAgent".to_string()
}

fn default_max_retries() -> u32 {
    2
}

fn default_max_steps() -> u32 {
    5
}

fn default_temperature() -> f64 {
    0.5
}

fn default_top_p() -> f64 {
    1.0
}

fn default_timeout_seconds() -> u64 {
    120
}

fn default_extra_headers() -> HashMap<String, String> {
    let mut headers = HashMap::new();
    // The hosted playground requires this marker header.
    headers.insert("x-missing-dev-playground".to_string(), "true".to_string());
    headers
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            run_id: default_run_id(),
            resource_id: default_resource_id(),
            max_retries: default_max_retries(),
            max_steps: default_max_steps(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            timeout_seconds: default_timeout_seconds(),
            extra_headers: default_extra_headers(),
        }
    }
}

/// Chat state storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the state database; the platform data directory is used
    /// when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Message submission rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum messages per window
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,

    /// Window length in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

fn default_max_requests() -> usize {
    10
}

fn default_window_seconds() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_seconds: default_window_seconds(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    ///
    /// A missing file yields the default configuration; a present but
    /// malformed file is an error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use nimbus::config::Config;
    ///
    /// # fn main() -> nimbus::error::Result<()> {
    /// let config = Config::load("config/nimbus.yaml")?;
    /// config.validate()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(NimbusError::Io)?;
        let config: Config = serde_yaml::from_str(&contents).map_err(NimbusError::Yaml)?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `NimbusError::Config` when the endpoint is not a valid
    /// URL, sampling parameters are out of range, or rate limits are
    /// zero.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.agent.endpoint).map_err(|e| {
            NimbusError::Config(format!(
                "invalid agent endpoint '{}': {}",
                self.agent.endpoint, e
            ))
        })?;

        if !(0.0..=2.0).contains(&self.agent.temperature) {
            return Err(NimbusError::Config(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.agent.temperature
            ))
            .into());
        }

        if !(0.0..=1.0).contains(&self.agent.top_p) {
            return Err(NimbusError::Config(format!(
                "top_p must be within 0.0..=1.0, got {}",
                self.agent.top_p
            ))
            .into());
        }

        if self.agent.timeout_seconds == 0 {
            return Err(
                NimbusError::Config("timeout_seconds must be greater than zero".to_string()).into(),
            );
        }

        if self.rate_limit.max_requests == 0 || self.rate_limit.window_seconds == 0 {
            return Err(NimbusError::Config(
                "rate limit max_requests and window_seconds must be greater than zero".to_string(),
            )
            .into());
        }

        Ok(())
    }
}
