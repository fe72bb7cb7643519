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

//! `EstIssuer` and `ClusterEstIssuer` resources.

use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use super::condition::{is_condition_true, Condition, ConditionType};
use super::{ObjectKey, ObjectMeta};
use crate::endpoint::EstEndpoint;
use crate::error::{EstError, Result};

/// Which flavor of issuer a resource is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuerKind {
    /// Namespaced issuer, usable by orders in its own namespace.
    EstIssuer,
    /// Cluster-scoped issuer, usable from every namespace.
    ClusterEstIssuer,
}

impl IssuerKind {
    /// Kind name as written in manifests and issuer references.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EstIssuer => "EstIssuer",
            Self::ClusterEstIssuer => "ClusterEstIssuer",
        }
    }
}

impl FromStr for IssuerKind {
    type Err = EstError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "EstIssuer" => Ok(Self::EstIssuer),
            "ClusterEstIssuer" => Ok(Self::ClusterEstIssuer),
            other => Err(EstError::config(format!("Unsupported issuer kind '{}'", other))),
        }
    }
}

/// An EST issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuer {
    /// Object metadata. Cluster-scoped issuers have no namespace.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: IssuerSpec,
    /// Observed state.
    #[serde(default)]
    pub status: IssuerStatus,
}

impl Issuer {
    /// Identity of the issuer.
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Kind derived from scope.
    pub fn kind(&self) -> IssuerKind {
        if self.metadata.namespace.is_some() {
            IssuerKind::EstIssuer
        } else {
            IssuerKind::ClusterEstIssuer
        }
    }

    /// Namespace holding the issuer's authentication secret.
    pub fn secret_namespace<'a>(&'a self, cluster_namespace: &'a str) -> &'a str {
        self.metadata.namespace.as_deref().unwrap_or(cluster_namespace)
    }

    /// Key of the issuer's Basic-auth secret.
    pub fn auth_secret_key(&self, cluster_namespace: &str) -> ObjectKey {
        ObjectKey::namespaced(
            self.secret_namespace(cluster_namespace),
            &self.spec.auth_secret_name,
        )
    }

    /// Returns true if the issuer's last readiness check succeeded.
    pub fn is_ready(&self) -> bool {
        is_condition_true(&self.status.conditions, ConditionType::Ready)
    }
}

/// Issuer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSpec {
    /// EST server hostname.
    pub hostname: String,

    /// EST server port.
    #[serde(default = "default_port", deserialize_with = "deserialize_port")]
    pub port: u16,

    /// Optional CA label (RFC 7030 Section 3.2.2 additional path segment).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Custom well-known root, if the server does not use `/.well-known/est`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub well_known_path: Option<String>,

    /// Base64-encoded PEM bundle of the server's trust anchors.
    pub cacert: String,

    /// Name of the secret holding Basic-auth `username` and `password`.
    pub auth_secret_name: String,
}

impl IssuerSpec {
    /// Build the EST endpoint described by this spec.
    pub fn endpoint(&self, default_well_known_path: &str) -> Result<EstEndpoint> {
        EstEndpoint::new(
            &self.hostname,
            self.port,
            self.well_known_path
                .as_deref()
                .unwrap_or(default_well_known_path),
            self.label.as_deref(),
        )
    }
}

fn default_port() -> u16 {
    443
}

/// Accept the port either as a number or as a numeric string.
fn deserialize_port<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid port '{}'", text))),
    }
}

/// Observed issuer state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerStatus {
    /// Status conditions; carries the `Ready` condition.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
