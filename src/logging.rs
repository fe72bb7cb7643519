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

//! Logging setup.
//!
//! The library only emits `tracing` events; the binary installs the
//! subscriber with [`init`]. The filter comes from `RUST_LOG` when set,
//! otherwise from the configured level raised by `-v` flags.
//!
//! ```toml
//! [logging]
//! level = "info,usg_est_operator=debug"
//! json = false
//! ```

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{EstError, Result};

/// Log level selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse from string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Filter directive for this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Level after `-v` repeated `verbose` times.
    pub fn raised(self, verbose: u8) -> Self {
        match (self, verbose) {
            (level, 0) => level,
            (Self::Error, v) => Self::Warn.raised(v - 1),
            (Self::Warn, v) => Self::Info.raised(v - 1),
            (Self::Info, v) => Self::Debug.raised(v - 1),
            (Self::Debug | Self::Trace, _) => Self::Trace,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter directive for the configured level and verbosity.
///
/// A plain level is raised by `verbose`; a full directive string is used
/// as written unless `-v` was given.
pub fn filter_directive(config: &LoggingConfig, verbose: u8) -> String {
    match LogLevel::parse(config.level.trim()) {
        Some(level) => level.raised(verbose).to_string(),
        None if verbose > 0 => LogLevel::Info.raised(verbose).to_string(),
        None => config.level.clone(),
    }
}

/// Install the global `tracing` subscriber.
///
/// # Errors
///
/// Returns [`EstError::Config`] if the filter is invalid or a subscriber
/// is already installed.
pub fn init(config: &LoggingConfig, verbose: u8) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directive(config, verbose))
            .map_err(|e| EstError::config(format!("Invalid log filter: {}", e)))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = if config.json {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.with_target(false).try_init()
    };
    result.map_err(|e| EstError::config(format!("Failed to install logger: {}", e)))
}
