// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
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

//! Operator configuration.
//!
//! The configuration is read from a TOML file. Every section is optional and
//! falls back to the defaults below:
//!
//! ```toml
//! [engine]
//! request_timeout_secs = 30
//! error_backoff_secs = 600
//! default_retry_after_secs = 60
//! well_known_path = "/.well-known/est"
//!
//! [scheduler]
//! workers = 4
//! initial_backoff_ms = 500
//! max_backoff_secs = 300
//!
//! [cluster]
//! resource_namespace = "est-operator"
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EstError, Result};

/// Default EST well-known root (RFC 7030 Section 3.2.2).
pub const DEFAULT_WELL_KNOWN_PATH: &str = "/.well-known/est";

/// Complete operator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperatorConfig {
    /// Order execution engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Reconciliation scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Settings for cluster-scoped resources.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl OperatorConfig {
    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| EstError::config(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EstError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| EstError::config(format!("TOML serialize: {e}")))
    }

    /// Validate the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns an error listing every validation failure.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.engine.request_timeout_secs == 0 {
            errors.push("engine.request_timeout_secs must be greater than zero");
        }
        if !self.engine.well_known_path.starts_with('/') {
            errors.push("engine.well_known_path must start with '/'");
        }
        if self.scheduler.workers == 0 {
            errors.push("scheduler.workers must be greater than zero");
        }
        if self.scheduler.max_backoff() < self.scheduler.initial_backoff() {
            errors.push("scheduler.max_backoff_secs must not be below initial_backoff_ms");
        }
        if self.scheduler.resync_secs == 0 {
            errors.push("scheduler.resync_secs must be greater than zero");
        }
        if self.cluster.resource_namespace.is_empty() {
            errors.push("cluster.resource_namespace must not be empty");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EstError::config(errors.join("; ")))
        }
    }
}

/// Order execution engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Upper bound for a single EST HTTP exchange.
    pub request_timeout_secs: u64,

    /// Delay before retrying after a 4xx, 5xx, or transport failure.
    pub error_backoff_secs: u64,

    /// Delay used when a 202 carries no usable Retry-After hint.
    pub default_retry_after_secs: u64,

    /// EST well-known root used when an issuer does not set its own.
    pub well_known_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            error_backoff_secs: 600,
            default_retry_after_secs: 60,
            well_known_path: DEFAULT_WELL_KNOWN_PATH.to_string(),
        }
    }
}

impl EngineConfig {
    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Error backoff as a [`Duration`].
    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    /// Fallback Retry-After delay as a [`Duration`].
    pub fn default_retry_after(&self) -> Duration {
        Duration::from_secs(self.default_retry_after_secs)
    }
}

/// Reconciliation scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Number of concurrent reconcile workers.
    pub workers: usize,

    /// First delay of the per-key exponential error backoff.
    pub initial_backoff_ms: u64,

    /// Ceiling of the per-key exponential error backoff.
    pub max_backoff_secs: u64,

    /// Interval at which issuers are checked again.
    pub resync_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            initial_backoff_ms: 500,
            max_backoff_secs: 300,
            resync_secs: 600,
        }
    }
}

impl SchedulerConfig {
    /// Initial backoff as a [`Duration`].
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Maximum backoff as a [`Duration`].
    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    /// Issuer resync interval as a [`Duration`].
    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }
}

/// Settings for cluster-scoped resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    /// Namespace holding secrets referenced by cluster-scoped issuers.
    pub resource_namespace: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            resource_namespace: "est-operator".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive (`RUST_LOG` takes precedence).
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
