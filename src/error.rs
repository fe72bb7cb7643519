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

//! Error types for the EST operator.
//!
//! Every failure below the order engine boundary is one of these variants.
//! [`EstError::class`] sorts them into the handful of classes the reconciler
//! cares about when deciding whether, and how soon, to try again.

use thiserror::Error;

/// Result type alias using [`EstError`].
pub type Result<T> = std::result::Result<T, EstError>;

/// Errors that can occur while reconciling issuers and orders.
#[derive(Debug, Error)]
pub enum EstError {
    /// Malformed issuer, secret, or order input.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Base64 decoding error.
    #[error("Base64 decode error: {0}")]
    Decode(#[from] base64::DecodeError),

    /// No usable trust anchor could be built from the CA bundle.
    #[error("Trust store error: {0}")]
    TrustStore(String),

    /// Credential material required for the selected authentication mode is absent.
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    /// The referenced issuer has not passed its readiness check.
    #[error("Issuer {0} is not ready")]
    IssuerNotReady(String),

    /// TLS configuration error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Failed to parse a CMS/PKCS#7 structure.
    #[error("CMS/PKCS#7 parsing error: {0}")]
    CmsParsing(String),

    /// Failed to parse or encode an X.509 certificate.
    #[error("Certificate parsing error: {0}")]
    CertificateParsing(String),

    /// Invalid PEM data.
    #[error("Invalid PEM data: {0}")]
    InvalidPem(String),

    /// The order's PKCS#10 request is not usable.
    #[error("CSR error: {0}")]
    Csr(String),

    /// The EST server answered a request with a non-success status.
    #[error("Server error {status}: {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Status text or body returned by the server.
        message: String,
    },

    /// A referenced object does not exist.
    #[error("{kind} {name} not found")]
    NotFound {
        /// Object kind.
        kind: &'static str,
        /// Namespaced name of the object.
        name: String,
    },

    /// A status write could not be persisted.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Resource manifest could not be read.
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// The reconciliation was cancelled before it finished.
    #[error("Reconciliation cancelled")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of errors used to pick a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed input. Not retried until the input changes.
    Config,
    /// Issuer not ready. Retried each cycle without a fixed backoff.
    Precondition,
    /// The EST server refused the request (4xx).
    ProtocolRejection,
    /// 5xx or transport failure.
    TransientServer,
    /// Status write failed. The whole attempt is retried.
    Persistence,
    /// Attempt aborted by shutdown. Safe to retry later.
    Cancelled,
}

impl EstError {
    /// Create a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a trust store error with the given message.
    pub fn trust_store(msg: impl Into<String>) -> Self {
        Self::TrustStore(msg.into())
    }

    /// Create a missing credential error with the given message.
    pub fn missing_credential(msg: impl Into<String>) -> Self {
        Self::MissingCredential(msg.into())
    }

    /// Create an issuer-not-ready error for the named issuer.
    pub fn issuer_not_ready(issuer: impl Into<String>) -> Self {
        Self::IssuerNotReady(issuer.into())
    }

    /// Create a TLS error with the given message.
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Create a CMS parsing error with the given message.
    pub fn cms_parsing(msg: impl Into<String>) -> Self {
        Self::CmsParsing(msg.into())
    }

    /// Create a certificate parsing error with the given message.
    pub fn certificate_parsing(msg: impl Into<String>) -> Self {
        Self::CertificateParsing(msg.into())
    }

    /// Create an invalid PEM error.
    pub fn invalid_pem(msg: impl Into<String>) -> Self {
        Self::InvalidPem(msg.into())
    }

    /// Create a CSR error with the given message.
    pub fn csr(msg: impl Into<String>) -> Self {
        Self::Csr(msg.into())
    }

    /// Create a server error with status and message.
    pub fn server_error(status: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status,
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create a persistence error with the given message.
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a manifest error with the given message.
    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest(msg.into())
    }

    /// Classify this error for retry decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_)
            | Self::Decode(_)
            | Self::TrustStore(_)
            | Self::MissingCredential(_)
            | Self::Url(_)
            | Self::InvalidPem(_)
            | Self::Csr(_)
            | Self::Manifest(_) => ErrorClass::Config,
            Self::IssuerNotReady(_) | Self::NotFound { .. } => ErrorClass::Precondition,
            Self::ServerError { status, .. } if (400..500).contains(status) => {
                ErrorClass::ProtocolRejection
            }
            Self::ServerError { .. }
            | Self::Tls(_)
            | Self::Http(_)
            | Self::CmsParsing(_)
            | Self::CertificateParsing(_)
            | Self::Io(_) => ErrorClass::TransientServer,
            Self::Persistence(_) => ErrorClass::Persistence,
            Self::Cancelled => ErrorClass::Cancelled,
        }
    }

    /// Returns true if retrying without operator intervention can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.class(), ErrorClass::Config)
    }
}
