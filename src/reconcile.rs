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

//! Reconcilers for issuers and orders.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::engine::OrderEngine;
use crate::error::{ErrorClass, EstError, Result};
use crate::readiness::ReadinessChecker;
use crate::status::StatusReporter;
use crate::store::ResourceStore;
use crate::types::ObjectKey;

/// What the scheduler should do with a key after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing further until the object changes.
    Done,
    /// Run again after the delay.
    RequeueAfter(Duration),
}

impl From<Option<Duration>> for Action {
    fn from(delay: Option<Duration>) -> Self {
        delay.map_or(Action::Done, Action::RequeueAfter)
    }
}

/// One reconciliation pass over an object identity.
///
/// The scheduler never runs two passes for the same key concurrently.
/// Errors are retried with per-key exponential backoff unless they are
/// configuration errors or cancellation.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Bring the object named by `key` to its desired state.
    async fn reconcile(&self, key: &ObjectKey, cancel: &CancellationToken) -> Result<Action>;
}

/// Keeps each issuer's `Ready` condition current.
pub struct IssuerReconciler {
    checker: ReadinessChecker,
    resync: Duration,
    retry: Duration,
}

impl IssuerReconciler {
    /// `resync` paces checks of ready issuers, `retry` of failing ones.
    pub fn new(checker: ReadinessChecker, resync: Duration, retry: Duration) -> Self {
        Self {
            checker,
            resync,
            retry,
        }
    }
}

#[async_trait]
impl Reconciler for IssuerReconciler {
    fn name(&self) -> &'static str {
        "issuer"
    }

    async fn reconcile(&self, key: &ObjectKey, cancel: &CancellationToken) -> Result<Action> {
        let report = tokio::select! {
            _ = cancel.cancelled() => return Err(EstError::Cancelled),
            report = self.checker.check(key) => report,
        };

        match report {
            Ok(report) if report.ready => Ok(Action::RequeueAfter(self.resync)),
            Ok(_) => Ok(Action::RequeueAfter(self.retry)),
            Err(EstError::NotFound { .. }) => Ok(Action::Done),
            Err(e) => Err(e),
        }
    }
}

/// Drives orders through the engine and reports the result.
pub struct OrderReconciler {
    store: Arc<dyn ResourceStore>,
    engine: OrderEngine,
    reporter: StatusReporter,
    error_backoff: Duration,
}

impl OrderReconciler {
    /// Create a reconciler; `error_backoff` delays the retry of rejected
    /// and failed attempts.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        engine: OrderEngine,
        reporter: StatusReporter,
        error_backoff: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            reporter,
            error_backoff,
        }
    }
}

#[async_trait]
impl Reconciler for OrderReconciler {
    fn name(&self) -> &'static str {
        "order"
    }

    async fn reconcile(&self, key: &ObjectKey, cancel: &CancellationToken) -> Result<Action> {
        let order = match self.store.get_order(key).await {
            Ok(order) => order,
            Err(EstError::NotFound { .. }) => {
                tracing::debug!(order = %key, "Order no longer exists");
                return Ok(Action::Done);
            }
            Err(e) => return Err(e),
        };

        if order.is_issued() {
            tracing::debug!(order = %key, "Order already issued");
            self.reporter.report_issued(&order).await?;
            return Ok(Action::Done);
        }

        match self.engine.execute(&order, cancel).await {
            Ok(attempt) => {
                self.reporter
                    .report(&order, &attempt.outcome, &attempt.ca, attempt.attempted_at)
                    .await?;
                Ok(attempt.outcome.requeue_after(self.error_backoff).into())
            }
            Err(e) => {
                if e.class() != ErrorClass::Cancelled {
                    self.reporter.report_failure(&order, &e).await?;
                }
                Err(e)
            }
        }
    }
}
