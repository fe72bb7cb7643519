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

//! Resource and protocol types.
//!
//! This module holds the control-plane objects the operator reads and
//! writes (issuers, orders, certificate requests, secrets), their status
//! conditions, and the [`OrderOutcome`] produced by one enrollment attempt.

pub mod condition;
mod issuer;
mod order;
mod pkcs7;
mod secret;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use condition::{Condition, ConditionStatus, ConditionType};
pub use issuer::{Issuer, IssuerKind, IssuerSpec, IssuerStatus};
pub use order::{
    CertificateRequest, CertificateRequestSpec, CertificateRequestStatus, Order, OrderSpec,
    OrderStatus, TLS_SECRET_ANNOTATION,
};
pub use pkcs7::{encode_certs_only, parse_certs_only, parse_enrollment_body, CertificateChain};
pub use secret::Secret;

use crate::error::{EstError, Result};

/// API group of the operator's own resources.
pub const API_GROUP: &str = "est.usg.gov";

/// Namespace-scoped identity of an object.
///
/// Cluster-scoped objects have no namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Namespace, or `None` for cluster-scoped objects.
    pub namespace: Option<String>,
    /// Object name.
    pub name: String,
}

impl ObjectKey {
    /// Key of a namespaced object.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key of a cluster-scoped object.
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Object metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name.
    pub name: String,
    /// Namespace, absent for cluster-scoped objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Free-form annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Owners of this object.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// The identity of the object described by this metadata.
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

/// Link from an owned object to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    /// API version of the owner.
    pub api_version: String,
    /// Kind of the owner.
    pub kind: String,
    /// Name of the owner (same namespace as the owned object).
    pub name: String,
    /// Whether the owner is the managing controller.
    #[serde(default)]
    pub controller: bool,
}

/// Reference from an order or certificate request to its issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerRef {
    /// `EstIssuer` or `ClusterEstIssuer`.
    #[serde(default = "default_issuer_kind")]
    pub kind: String,
    /// API group of the issuer.
    #[serde(default = "default_issuer_group")]
    pub group: String,
    /// Issuer name.
    pub name: String,
}

fn default_issuer_kind() -> String {
    IssuerKind::EstIssuer.as_str().to_string()
}

fn default_issuer_group() -> String {
    API_GROUP.to_string()
}

impl IssuerRef {
    /// Reference a namespaced `EstIssuer`.
    pub fn est_issuer(name: impl Into<String>) -> Self {
        Self {
            kind: default_issuer_kind(),
            group: default_issuer_group(),
            name: name.into(),
        }
    }

    /// Reference a `ClusterEstIssuer`.
    pub fn cluster_est_issuer(name: impl Into<String>) -> Self {
        Self {
            kind: IssuerKind::ClusterEstIssuer.as_str().to_string(),
            group: default_issuer_group(),
            name: name.into(),
        }
    }

    /// Resolve the reference to an object key, relative to the referring
    /// object's namespace.
    pub fn resolve(&self, namespace: Option<&str>) -> Result<ObjectKey> {
        match self.kind.parse::<IssuerKind>()? {
            IssuerKind::ClusterEstIssuer => Ok(ObjectKey::cluster(&self.name)),
            IssuerKind::EstIssuer => {
                let namespace = namespace.ok_or_else(|| {
                    EstError::config(format!(
                        "EstIssuer {} referenced from a cluster-scoped object",
                        self.name
                    ))
                })?;
                Ok(ObjectKey::namespaced(namespace, &self.name))
            }
        }
    }
}

/// Result of one enrollment attempt.
///
/// This is the contract between the order engine and the status reporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderOutcome {
    /// The server issued the certificate (HTTP 200).
    Issued {
        /// Issued certificate followed by any chain certificates.
        chain: CertificateChain,
    },

    /// The server accepted the request for later processing (HTTP 202).
    Pending {
        /// Minimum delay before polling again.
        retry_after: Duration,
        /// Set when the server's hint was missing or unusable.
        warning: Option<String>,
    },

    /// The request was refused.
    ///
    /// `status` is the HTTP status for a server refusal (4xx) and `None`
    /// when the order itself is unusable and no request was sent.
    Rejected {
        /// HTTP status, if the server answered.
        status: Option<u16>,
        /// Status text or validation failure.
        reason: String,
    },

    /// The server failed (5xx) or could not be reached.
    ServerError {
        /// HTTP status, if one was received.
        status: Option<u16>,
        /// Status text or transport error.
        reason: String,
    },
}

impl OrderOutcome {
    /// Create an issued outcome.
    pub fn issued(chain: CertificateChain) -> Self {
        Self::Issued { chain }
    }

    /// Create a pending outcome.
    pub fn pending(retry_after: Duration) -> Self {
        Self::Pending {
            retry_after,
            warning: None,
        }
    }

    /// Create a rejected outcome.
    pub fn rejected(status: Option<u16>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            reason: reason.into(),
        }
    }

    /// Create a server error outcome.
    pub fn server_error(status: Option<u16>, reason: impl Into<String>) -> Self {
        Self::ServerError {
            status,
            reason: reason.into(),
        }
    }

    /// Short name of the outcome, also used as the condition reason.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Issued { .. } => "Issued",
            Self::Pending { .. } => "Pending",
            Self::Rejected { .. } => "Rejected",
            Self::ServerError { .. } => "ServerError",
        }
    }

    /// Returns true for the terminal-success outcome.
    pub fn is_issued(&self) -> bool {
        matches!(self, Self::Issued { .. })
    }

    /// Delay after which the scheduler should run this order again.
    ///
    /// `None` means the order is finished: either issued, or rejected
    /// locally in a way only an operator can fix.
    pub fn requeue_after(&self, error_backoff: Duration) -> Option<Duration> {
        match self {
            Self::Issued { .. } => None,
            Self::Pending { retry_after, .. } => Some(*retry_after),
            Self::Rejected { status: None, .. } => None,
            Self::Rejected { status: Some(_), .. } | Self::ServerError { .. } => {
                Some(error_backoff)
            }
        }
    }
}

/// Content types used in EST protocol.
pub mod content_types {
    /// PKCS#10 CSR content type.
    pub const PKCS10: &str = "application/pkcs10";
}

/// EST operation paths.
pub mod operations {
    /// CA certificates endpoint.
    pub const CACERTS: &str = "cacerts";

    /// Simple enrollment endpoint.
    pub const SIMPLE_ENROLL: &str = "simpleenroll";

    /// Simple re-enrollment endpoint.
    pub const SIMPLE_REENROLL: &str = "simplereenroll";
}
