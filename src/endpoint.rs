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

//! EST endpoint URL construction.
//!
//! Operation URLs have the form
//! `https://{hostname}:{port}{well_known}[/{label}]/{operation}`.

use url::Url;

use crate::error::{EstError, Result};

/// Location of an EST service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstEndpoint {
    base: Url,
    prefix: String,
}

impl EstEndpoint {
    /// Build an endpoint from issuer coordinates.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty hostname or an address
    /// that does not form a valid URL.
    pub fn new(
        hostname: &str,
        port: u16,
        well_known_path: &str,
        label: Option<&str>,
    ) -> Result<Self> {
        let hostname = hostname.trim();
        if hostname.is_empty() {
            return Err(EstError::config("Issuer hostname is empty"));
        }

        // Bare IPv6 literals need brackets inside a URL
        let host = if hostname.contains(':') && !hostname.starts_with('[') {
            format!("[{}]", hostname)
        } else {
            hostname.to_string()
        };

        let base = Url::parse(&format!("https://{}:{}", host, port)).map_err(|e| {
            EstError::config(format!("Invalid EST address {}:{}: {}", hostname, port, e))
        })?;

        let mut prefix = String::new();
        for segment in [Some(well_known_path), label]
            .into_iter()
            .flatten()
            .flat_map(|s| s.split('/'))
            .filter(|s| !s.is_empty())
        {
            prefix.push('/');
            prefix.push_str(segment);
        }

        Ok(Self { base, prefix })
    }

    /// `https://{hostname}:{port}` of the EST server.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Path prefix shared by every operation, including any label.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full URL of the given EST operation.
    pub fn operation_url(&self, operation: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(&format!("{}/{}", self.prefix, operation));
        url
    }
}
