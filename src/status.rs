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

//! Status reporting.
//!
//! Every outcome becomes exactly one condition on the order, keyed by type,
//! plus a mirrored `Ready` condition on the owning certificate request.
//! Reporting the same outcome twice leaves both objects untouched.

use std::sync::Arc;

use base64::prelude::*;
use chrono::{DateTime, Utc};

use crate::error::{ErrorClass, EstError, Result};
use crate::store::ResourceStore;
use crate::types::condition::{find_condition, set_condition};
use crate::types::{Condition, ConditionStatus, ConditionType, Order, OrderOutcome, OrderStatus};

/// Condition reason for orders rejected before any request was sent.
pub const REASON_INVALID_REQUEST: &str = "InvalidRequest";

/// Condition reason for orders waiting on their issuer.
pub const REASON_ISSUER_NOT_READY: &str = "IssuerNotReady";

/// Result fields written on issuance.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Issuance {
    certificate: String,
    ca: String,
}

/// Writes engine results to the order and its certificate request.
pub struct StatusReporter {
    store: Arc<dyn ResourceStore>,
}

impl StatusReporter {
    /// Create a reporter writing to `store`.
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Persist an outcome.
    ///
    /// `ca` is the issuer's base64 CA bundle, copied into status on
    /// issuance. `attempted_at` is set when a request reached the wire.
    ///
    /// # Errors
    ///
    /// Returns [`EstError::Persistence`] if either write fails.
    pub async fn report(
        &self,
        order: &Order,
        outcome: &OrderOutcome,
        ca: &str,
        attempted_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let now = Utc::now();
        let condition = outcome_condition(outcome, now);
        let mirrored = mirrored_condition(outcome, now);

        let issuance = match outcome {
            OrderOutcome::Issued { chain } => Some(Issuance {
                certificate: BASE64_STANDARD.encode(chain.to_pem()?),
                ca: ca.to_string(),
            }),
            _ => None,
        };

        self.apply(order, condition, mirrored, issuance, attempted_at)
            .await
    }

    /// Persist an error that stopped the engine before it produced an
    /// outcome.
    ///
    /// Cancellation and persistence failures are not recorded: nothing may
    /// be written for an aborted attempt, and a failed store would fail
    /// again.
    pub async fn report_failure(&self, order: &Order, error: &EstError) -> Result<()> {
        let now = Utc::now();
        let (condition, mirror_reason) = match error.class() {
            ErrorClass::Cancelled | ErrorClass::Persistence => return Ok(()),
            ErrorClass::Precondition => (
                Condition::new(
                    ConditionType::Pending,
                    ConditionStatus::Unknown,
                    REASON_ISSUER_NOT_READY,
                    error.to_string(),
                    now,
                ),
                REASON_ISSUER_NOT_READY,
            ),
            ErrorClass::Config => {
                let reason = match error {
                    EstError::MissingCredential(_) => "MissingCredential",
                    _ => "InvalidConfiguration",
                };
                (
                    Condition::new(
                        ConditionType::Rejected,
                        ConditionStatus::True,
                        reason,
                        error.to_string(),
                        now,
                    ),
                    reason,
                )
            }
            ErrorClass::ProtocolRejection | ErrorClass::TransientServer => (
                Condition::new(
                    ConditionType::Pending,
                    ConditionStatus::Unknown,
                    "Error",
                    error.to_string(),
                    now,
                ),
                "Error",
            ),
        };

        let mirrored = Condition::new(
            ConditionType::Ready,
            ConditionStatus::False,
            mirror_reason,
            error.to_string(),
            now,
        );
        self.apply(order, condition, mirrored, None, None).await
    }

    /// Re-apply the status of an order that is already issued.
    ///
    /// The order's own status is left as stored. The certificate request
    /// receives the mirrored `Ready` condition and the stored chain again,
    /// which completes an earlier report whose second write failed.
    ///
    /// # Errors
    ///
    /// Returns [`EstError::Persistence`] if a write fails.
    pub async fn report_issued(&self, order: &Order) -> Result<()> {
        let Some(issued) = find_condition(&order.status.conditions, ConditionType::Issued)
            .filter(|c| c.is_true())
            .cloned()
        else {
            return Ok(());
        };

        let mirrored = Condition::new(
            ConditionType::Ready,
            ConditionStatus::True,
            issued.reason.clone(),
            issued.message.clone(),
            issued.last_transition_time,
        );
        let issuance = match (&order.status.certificate, &order.status.ca) {
            (Some(certificate), ca) => Some(Issuance {
                certificate: certificate.clone(),
                ca: ca.clone().unwrap_or_default(),
            }),
            (None, _) => None,
        };

        self.apply(order, issued, mirrored, issuance, None).await
    }

    async fn apply(
        &self,
        order: &Order,
        condition: Condition,
        mirrored: Condition,
        issuance: Option<Issuance>,
        attempted_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let key = order.key();

        let mut status: OrderStatus = order.status.clone();
        let mut changed = set_condition(&mut status.conditions, condition);
        if let Some(issuance) = &issuance {
            changed |= replace(&mut status.certificate, &issuance.certificate);
            changed |= replace(&mut status.ca, &issuance.ca);
            changed |= clear_superseded(&mut status.conditions, Utc::now());
        }
        if attempted_at.is_some() && status.last_attempt_time != attempted_at {
            status.last_attempt_time = attempted_at;
            changed = true;
        }

        if changed {
            self.store
                .update_order_status(&key, status)
                .await
                .map_err(|e| persistence_error(&key, e))?;
        }

        let request_key = order.certificate_request_key();
        let request = match self.store.get_certificate_request(&request_key).await {
            Ok(request) => request,
            Err(EstError::NotFound { .. }) => {
                tracing::debug!(order = %key, "No certificate request {} to update", request_key);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut request_status = request.status.clone();
        let mut changed = set_condition(&mut request_status.conditions, mirrored);
        if let Some(issuance) = &issuance {
            changed |= replace(&mut request_status.certificate, &issuance.certificate);
            changed |= replace(&mut request_status.ca, &issuance.ca);
        }

        if changed {
            self.store
                .update_certificate_request_status(&request_key, request_status)
                .await
                .map_err(|e| persistence_error(&request_key, e))?;
        }
        Ok(())
    }
}

/// Set `Pending` and `Rejected` to `False` once the order is issued.
fn clear_superseded(conditions: &mut Vec<Condition>, now: DateTime<Utc>) -> bool {
    let mut changed = false;
    for condition_type in [ConditionType::Pending, ConditionType::Rejected] {
        let stale = find_condition(conditions, condition_type)
            .is_some_and(|c| c.status != ConditionStatus::False);
        if stale {
            changed |= set_condition(
                conditions,
                Condition::new(
                    condition_type,
                    ConditionStatus::False,
                    "Issued",
                    "Superseded by certificate issuance",
                    now,
                ),
            );
        }
    }
    changed
}

fn replace(field: &mut Option<String>, value: &str) -> bool {
    if field.as_deref() == Some(value) {
        return false;
    }
    *field = Some(value.to_string());
    true
}

fn persistence_error(key: &crate::types::ObjectKey, err: EstError) -> EstError {
    tracing::error!("Failed to persist status of {}: {}", key, err);
    match err {
        EstError::Persistence(_) => err,
        other => EstError::persistence(format!("{}: {}", key, other)),
    }
}

/// The order condition for an outcome.
pub fn outcome_condition(outcome: &OrderOutcome, now: DateTime<Utc>) -> Condition {
    match outcome {
        OrderOutcome::Issued { chain } => Condition::new(
            ConditionType::Issued,
            ConditionStatus::True,
            outcome.name(),
            format!("Certificate issued ({} certificates in chain)", chain.len()),
            now,
        ),
        OrderOutcome::Pending {
            retry_after,
            warning,
        } => {
            let mut message = format!(
                "Enrollment pending on the EST server, polling again in {}s",
                retry_after.as_secs()
            );
            if let Some(warning) = warning {
                message.push_str(&format!(" ({})", warning));
            }
            Condition::new(
                ConditionType::Pending,
                ConditionStatus::True,
                outcome.name(),
                message,
                now,
            )
        }
        OrderOutcome::Rejected { status, reason } => Condition::new(
            ConditionType::Rejected,
            ConditionStatus::True,
            match status {
                Some(_) => outcome.name(),
                None => REASON_INVALID_REQUEST,
            },
            reason.clone(),
            now,
        ),
        OrderOutcome::ServerError { reason, .. } => Condition::new(
            ConditionType::Pending,
            ConditionStatus::Unknown,
            outcome.name(),
            reason.clone(),
            now,
        ),
    }
}

/// The `Ready` condition mirrored onto the certificate request.
pub fn mirrored_condition(outcome: &OrderOutcome, now: DateTime<Utc>) -> Condition {
    let source = outcome_condition(outcome, now);
    Condition::new(
        ConditionType::Ready,
        ConditionStatus::from(outcome.is_issued()),
        source.reason,
        source.message,
        now,
    )
}
