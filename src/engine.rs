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

//! Order execution.
//!
//! [`OrderEngine::execute`] makes exactly one enrollment attempt for an
//! order and returns what happened. It keeps no state between calls: a
//! pending order is simply executed again after its `Retry-After` delay,
//! with a fresh request to the same endpoint.
//!
//! The attempt runs in a fixed sequence:
//!
//! 1. resolve the issuer and require it to be ready
//! 2. decode the CSR (failure is a terminal rejection, nothing is sent)
//! 3. pick credentials from the renewal flag and build a transport
//! 4. POST the CSR to `simpleenroll` or `simplereenroll`
//! 5. classify the reply by status code

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

use crate::auth::{select_credentials, Credentials};
use crate::client::{EstReply, TransportFactory};
use crate::config::EngineConfig;
use crate::csr::decode_request;
use crate::error::{EstError, Result};
use crate::retry_after::parse_retry_after;
use crate::store::ResourceStore;
use crate::trust::TrustAnchor;
use crate::types::{parse_enrollment_body, Issuer, Order, OrderOutcome, Secret};

/// Longest server body quoted in a rejection reason.
const MAX_REASON_BODY: usize = 256;

/// What one call to [`OrderEngine::execute`] produced.
#[derive(Debug, Clone)]
pub struct Attempt {
    /// The outcome to report.
    pub outcome: OrderOutcome,
    /// When the request was sent, if one was.
    pub attempted_at: Option<DateTime<Utc>>,
    /// The issuer's base64 CA bundle, recorded alongside an issued chain.
    pub ca: String,
}

/// Runs single enrollment attempts.
pub struct OrderEngine {
    store: Arc<dyn ResourceStore>,
    transports: Arc<dyn TransportFactory>,
    config: EngineConfig,
    cluster_namespace: String,
}

impl OrderEngine {
    /// Create an engine. `cluster_namespace` holds the secrets of
    /// cluster-scoped issuers.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        transports: Arc<dyn TransportFactory>,
        config: EngineConfig,
        cluster_namespace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transports,
            config,
            cluster_namespace: cluster_namespace.into(),
        }
    }

    /// Make one enrollment attempt for `order`.
    ///
    /// Transport failures and every HTTP status become an [`OrderOutcome`].
    ///
    /// # Errors
    ///
    /// - [`EstError::IssuerNotReady`] / [`EstError::NotFound`] when the
    ///   issuer is not usable yet; no request is sent
    /// - configuration errors (bad endpoint, trust anchor or credentials)
    /// - [`EstError::Cancelled`] if `cancel` fires during the exchange
    pub async fn execute(&self, order: &Order, cancel: &CancellationToken) -> Result<Attempt> {
        let order_key = order.key();
        let issuer_key = order
            .spec
            .issuer_ref
            .resolve(order.metadata.namespace.as_deref())?;

        let issuer = self.store.get_issuer(&issuer_key).await?;
        if !issuer.is_ready() {
            return Err(EstError::issuer_not_ready(issuer_key.to_string()));
        }
        let ca = issuer.spec.cacert.clone();

        let csr = match decode_request(&order.spec.request) {
            Ok(csr) => csr,
            Err(e) => {
                tracing::warn!(order = %order_key, "Rejecting order: {}", e);
                return Ok(Attempt {
                    outcome: OrderOutcome::rejected(None, e.to_string()),
                    attempted_at: None,
                    ca,
                });
            }
        };

        let endpoint = issuer.spec.endpoint(&self.config.well_known_path)?;
        let trust = TrustAnchor::from_base64(&issuer.spec.cacert)?;
        let credentials = self.credentials(order, &issuer).await?;
        let transport = self.transports.create(&trust, Some(&credentials))?;
        let url = endpoint.operation_url(credentials.operation());

        tracing::info!(
            order = %order_key,
            issuer = %issuer_key,
            subject = %csr.subject,
            "Submitting CSR to {}",
            url
        );

        let attempted_at = Utc::now();
        let reply = tokio::select! {
            _ = cancel.cancelled() => return Err(EstError::Cancelled),
            reply = transport.submit_csr(&url, &csr.der) => reply,
        };

        let outcome = match reply {
            Ok(reply) => classify_response(&reply, self.config.default_retry_after(), Utc::now()),
            Err(e) => OrderOutcome::server_error(None, e.to_string()),
        };
        log_outcome(&order_key, &outcome);

        Ok(Attempt {
            outcome,
            attempted_at: Some(attempted_at),
            ca,
        })
    }

    async fn credentials(&self, order: &Order, issuer: &Issuer) -> Result<Credentials> {
        if order.spec.renewal {
            let tls_secret = self.tls_secret(order).await?;
            select_credentials(true, None, tls_secret.as_ref())
        } else {
            let key = issuer.auth_secret_key(&self.cluster_namespace);
            let auth_secret = optional(self.store.get_secret(&key).await)?;
            select_credentials(false, auth_secret.as_ref(), None)
        }
    }

    async fn tls_secret(&self, order: &Order) -> Result<Option<Secret>> {
        let request_key = order.certificate_request_key();
        let Some(request) = optional(self.store.get_certificate_request(&request_key).await)?
        else {
            return Ok(None);
        };
        match request.tls_secret_key() {
            Some(key) => optional(self.store.get_secret(&key).await),
            None => Ok(None),
        }
    }
}

fn optional<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(EstError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Map an EST reply to an outcome.
pub fn classify_response(
    reply: &EstReply,
    default_retry_after: Duration,
    now: DateTime<Utc>,
) -> OrderOutcome {
    match reply.status {
        200 => match parse_enrollment_body(&reply.body) {
            Ok(chain) => OrderOutcome::issued(chain),
            Err(e) => OrderOutcome::server_error(
                Some(200),
                format!("malformed enrollment response: {}", e),
            ),
        },
        202 => {
            let hint = parse_retry_after(reply.retry_after.as_deref(), default_retry_after, now);
            OrderOutcome::Pending {
                retry_after: hint.delay,
                warning: hint.warning,
            }
        }
        status @ 400..=499 => OrderOutcome::rejected(Some(status), status_reason(reply)),
        status @ 500..=599 => OrderOutcome::server_error(Some(status), status_reason(reply)),
        status => OrderOutcome::server_error(
            Some(status),
            format!("unexpected response: {}", status_reason(reply)),
        ),
    }
}

fn status_reason(reply: &EstReply) -> String {
    let status = match StatusCode::from_u16(reply.status) {
        Ok(code) => match code.canonical_reason() {
            Some(text) => format!("{} {}", reply.status, text),
            None => reply.status.to_string(),
        },
        Err(_) => reply.status.to_string(),
    };

    let body = reply.body_text();
    if body.is_empty() {
        return status;
    }
    let body: String = body.chars().take(MAX_REASON_BODY).collect();
    format!("{}: {}", status, body)
}

fn log_outcome(order: &crate::types::ObjectKey, outcome: &OrderOutcome) {
    match outcome {
        OrderOutcome::Issued { chain } => {
            tracing::info!(order = %order, certificates = chain.len(), "Certificate issued");
        }
        OrderOutcome::Pending {
            retry_after,
            warning,
        } => {
            if let Some(warning) = warning {
                tracing::warn!(order = %order, "{}", warning);
            }
            tracing::info!(
                order = %order,
                retry_after = retry_after.as_secs(),
                "Enrollment pending"
            );
        }
        OrderOutcome::Rejected { status, reason } => {
            tracing::warn!(order = %order, status = ?status, "Enrollment rejected: {}", reason);
        }
        OrderOutcome::ServerError { status, reason } => {
            tracing::warn!(order = %order, status = ?status, "EST server error: {}", reason);
        }
    }
}
