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

//! Issuer readiness.
//!
//! An issuer is ready when a `GET /cacerts` against its endpoint, verified
//! with its own trust anchor, returns a well-formed certificate bundle. The
//! check has no retry of its own; it runs again on the next reconciliation
//! of the issuer.

use std::sync::Arc;

use chrono::Utc;
use der::Encode;
use sha2::{Digest, Sha256};

use crate::client::TransportFactory;
use crate::error::{EstError, Result};
use crate::store::ResourceStore;
use crate::trust::{format_fingerprint, TrustAnchor};
use crate::types::condition::set_condition;
use crate::types::{
    operations, parse_enrollment_body, Condition, ConditionStatus, ConditionType, Issuer,
    ObjectKey,
};

/// Result of one readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessReport {
    /// Whether the check succeeded.
    pub ready: bool,
    /// CamelCase reason recorded on the `Ready` condition.
    pub reason: &'static str,
    /// Human-readable detail.
    pub message: String,
}

impl ReadinessReport {
    fn verified(count: usize) -> Self {
        Self {
            ready: true,
            reason: "Verified",
            message: format!("EST server returned {} CA certificates", count),
        }
    }

    fn failed(err: &EstError) -> Self {
        Self {
            ready: false,
            reason: failure_reason(err),
            message: err.to_string(),
        }
    }

    /// The `Ready` condition this report translates to.
    pub fn condition(&self) -> Condition {
        Condition::new(
            ConditionType::Ready,
            ConditionStatus::from(self.ready),
            self.reason,
            self.message.clone(),
            Utc::now(),
        )
    }
}

fn failure_reason(err: &EstError) -> &'static str {
    match err {
        EstError::Decode(_) | EstError::TrustStore(_) => "InvalidTrustAnchor",
        EstError::Config(_) | EstError::Url(_) => "InvalidConfiguration",
        EstError::ServerError { .. } => "ServerError",
        EstError::CmsParsing(_) | EstError::CertificateParsing(_) | EstError::InvalidPem(_) => {
            "MalformedResponse"
        }
        _ => "Unreachable",
    }
}

/// Checks issuers and records their `Ready` condition.
pub struct ReadinessChecker {
    store: Arc<dyn ResourceStore>,
    transports: Arc<dyn TransportFactory>,
    well_known_path: String,
}

impl ReadinessChecker {
    /// Create a checker.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        transports: Arc<dyn TransportFactory>,
        well_known_path: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transports,
            well_known_path: well_known_path.into(),
        }
    }

    /// Fetch the issuer's `/cacerts` endpoint. Never fails; the failure is
    /// carried in the report.
    pub async fn verify(&self, issuer: &Issuer) -> ReadinessReport {
        match self.fetch_ca_certs(issuer).await {
            Ok(count) => ReadinessReport::verified(count),
            Err(e) => {
                tracing::warn!(issuer = %issuer.key(), "Readiness check failed: {}", e);
                ReadinessReport::failed(&e)
            }
        }
    }

    async fn fetch_ca_certs(&self, issuer: &Issuer) -> Result<usize> {
        let endpoint = issuer.spec.endpoint(&self.well_known_path)?;
        let trust = TrustAnchor::from_base64(&issuer.spec.cacert)?;
        let transport = self.transports.create(&trust, None)?;

        let reply = transport
            .fetch_ca_certs(&endpoint.operation_url(operations::CACERTS))
            .await?;
        if reply.status != 200 {
            return Err(EstError::server_error(reply.status, reply.body_text()));
        }

        let chain = parse_enrollment_body(&reply.body)?;
        for cert in chain.iter() {
            if let Ok(der) = cert.to_der() {
                let fingerprint: [u8; 32] = Sha256::digest(&der).into();
                tracing::debug!(
                    issuer = %issuer.key(),
                    subject = %cert.tbs_certificate.subject,
                    "CA certificate {}",
                    format_fingerprint(&fingerprint)
                );
            }
        }
        Ok(chain.len())
    }

    /// Verify an issuer and persist its `Ready` condition.
    ///
    /// # Errors
    ///
    /// Returns [`EstError::NotFound`] if the issuer is gone and
    /// [`EstError::Persistence`] if the status cannot be written.
    pub async fn check(&self, key: &ObjectKey) -> Result<ReadinessReport> {
        let issuer = self.store.get_issuer(key).await?;
        let report = self.verify(&issuer).await;

        let mut status = issuer.status.clone();
        if set_condition(&mut status.conditions, report.condition()) {
            tracing::info!(
                issuer = %key,
                ready = report.ready,
                reason = report.reason,
                "Issuer readiness changed"
            );
            self.store.update_issuer_status(key, status).await?;
        }
        Ok(report)
    }
}
