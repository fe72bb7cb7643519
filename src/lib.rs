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

//! # usg-est-operator
//!
//! Certificate enrollment against RFC 7030 EST servers for requests raised
//! in a cluster control plane.
//!
//! An *issuer* describes an EST server: hostname, port, optional label,
//! a base64 PEM CA bundle and the name of a Basic-auth secret. An *order*
//! carries a base64 PKCS#10 request, a reference to an issuer and a renewal
//! flag. The operator checks issuers with `GET /cacerts`, then drives each
//! order through one `simpleenroll` (or `simplereenroll`) exchange per
//! reconciliation pass until the server issues a certificate.
//!
//! ## Components
//!
//! - [`trust`]: CA bundle to TLS trust anchors
//! - [`readiness`]: issuer `/cacerts` check and `Ready` condition
//! - [`auth`]: Basic auth for enrollment, client certificate for renewal
//! - [`engine`]: one enrollment attempt, classified into an [`OrderOutcome`]
//! - [`status`]: idempotent condition updates on orders and requests
//! - [`scheduler`]: per-key serialized work queue and worker pool
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tokio_util::sync::CancellationToken;
//! use usg_est_operator::client::HttpTransportFactory;
//! use usg_est_operator::engine::OrderEngine;
//! use usg_est_operator::store::{InMemoryStore, ResourceStore};
//! use usg_est_operator::types::ObjectKey;
//! use usg_est_operator::OperatorConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OperatorConfig::default();
//! let store = Arc::new(InMemoryStore::from_manifest_file("resources.yaml").await?);
//! let transports = Arc::new(HttpTransportFactory::new(config.engine.request_timeout()));
//!
//! let engine = OrderEngine::new(
//!     store.clone(),
//!     transports,
//!     config.engine.clone(),
//!     config.cluster.resource_namespace.clone(),
//! );
//!
//! let order = store.get_order(&ObjectKey::namespaced("default", "web")).await?;
//! let attempt = engine.execute(&order, &CancellationToken::new()).await?;
//! println!("{}", attempt.outcome.name());
//! # Ok(())
//! # }
//! ```
//!
//! ## RFC 7030 Compliance
//!
//! - Section 3.2.2: `/.well-known/est` root with optional label
//! - Section 3.3: TLS 1.2 or later, explicit trust anchors only
//! - Section 4.1: CA certificate distribution (`/cacerts`)
//! - Section 4.2: simple enrollment and re-enrollment, including 202
//!   `Retry-After` polling

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod auth;
pub mod client;
pub mod config;
pub mod csr;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod logging;
pub mod readiness;
pub mod reconcile;
pub mod retry_after;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod tls;
pub mod trust;
pub mod types;

pub use client::{EstHttpClient, EstReply, EstTransport, HttpTransportFactory, TransportFactory};
pub use config::OperatorConfig;
pub use engine::OrderEngine;
pub use error::{ErrorClass, EstError, Result};
pub use trust::TrustAnchor;
pub use types::{Condition, ConditionStatus, ConditionType, OrderOutcome};

// Re-export x509_cert::Certificate for convenience
pub use x509_cert::Certificate;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent string for HTTP requests.
pub const USER_AGENT: &str = concat!("usg-est-operator/", env!("CARGO_PKG_VERSION"));
