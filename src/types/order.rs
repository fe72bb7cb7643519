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

//! `EstOrder` and the upstream `CertificateRequest` it is created from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::condition::{is_condition_true, Condition, ConditionType};
use super::{IssuerRef, ObjectKey, ObjectMeta};

/// Annotation on a certificate request naming the secret that holds the
/// previously issued `tls.crt`/`tls.key`.
pub const TLS_SECRET_ANNOTATION: &str = "cert-manager.io/private-key-secret-name";

/// Kind of the upstream object that owns an order.
const CERTIFICATE_REQUEST_KIND: &str = "CertificateRequest";

/// One enrollment order.
///
/// Orders are immutable apart from status; a renewal is a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: OrderSpec,
    /// Observed state.
    #[serde(default)]
    pub status: OrderStatus,
}

impl Order {
    /// Identity of the order.
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// The certificate request that owns this order.
    ///
    /// Falls back to the request with the order's own name, since the two
    /// are created 1:1.
    pub fn certificate_request_key(&self) -> ObjectKey {
        let name = self
            .metadata
            .owner_references
            .iter()
            .filter(|o| o.kind == CERTIFICATE_REQUEST_KIND)
            .max_by_key(|o| o.controller)
            .map(|o| o.name.clone())
            .unwrap_or_else(|| self.metadata.name.clone());

        ObjectKey {
            namespace: self.metadata.namespace.clone(),
            name,
        }
    }

    /// Returns true once a certificate has been issued for this order.
    pub fn is_issued(&self) -> bool {
        is_condition_true(&self.status.conditions, ConditionType::Issued)
    }
}

/// Order configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSpec {
    /// Issuer to enroll against.
    pub issuer_ref: IssuerRef,
    /// Base64-encoded PKCS#10 request (DER or PEM).
    pub request: String,
    /// Re-enroll with the prior certificate instead of enrolling.
    #[serde(default)]
    pub renewal: bool,
}

/// Observed order state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatus {
    /// Status conditions keyed by type.
    ///
    /// Once `Issued` is `True`, any `Pending` or `Rejected` entry is set to
    /// `False`.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Base64-encoded PEM chain once issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    /// Base64-encoded PEM CA bundle of the issuer once issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
    /// Time of the last enrollment attempt that reached the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_time: Option<DateTime<Utc>>,
}

/// Upstream certificate request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: CertificateRequestSpec,
    /// Observed state.
    #[serde(default)]
    pub status: CertificateRequestStatus,
}

impl CertificateRequest {
    /// Identity of the request.
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Key of the secret holding the previously issued certificate and key.
    pub fn tls_secret_key(&self) -> Option<ObjectKey> {
        let name = self.metadata.annotations.get(TLS_SECRET_ANNOTATION)?;
        Some(ObjectKey {
            namespace: self.metadata.namespace.clone(),
            name: name.clone(),
        })
    }
}

/// Certificate request configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestSpec {
    /// Issuer to enroll against.
    pub issuer_ref: IssuerRef,
    /// Base64-encoded PKCS#10 request.
    pub request: String,
}

/// Observed certificate request state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestStatus {
    /// Status conditions; carries the mirrored `Ready` condition.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Base64-encoded PEM chain once issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    /// Base64-encoded PEM CA bundle once issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
}
