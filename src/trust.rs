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

//! Trust anchor construction.
//!
//! An issuer stores its CA bundle as base64-encoded PEM. [`TrustAnchor`]
//! turns that into the set of certificates the HTTP client will accept as
//! roots when verifying the EST server. Nothing else is trusted: the
//! platform and webpki root stores are never consulted.

use base64::prelude::*;
use der::Decode;
use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;
use sha2::{Digest, Sha256};

use crate::error::{EstError, Result};

/// Verified set of CA certificates for TLS peer verification.
#[derive(Clone)]
pub struct TrustAnchor {
    certs: Vec<CertificateDer<'static>>,
    pem: Vec<u8>,
}

impl std::fmt::Debug for TrustAnchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TrustAnchor({} certs)", self.certs.len())
    }
}

impl TrustAnchor {
    /// Build a trust anchor from a base64-encoded PEM bundle.
    ///
    /// # Errors
    ///
    /// Returns [`EstError::Decode`] if the base64 layer is invalid and
    /// [`EstError::TrustStore`] if no certificate in the bundle is usable.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let cleaned: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let pem = BASE64_STANDARD.decode(cleaned)?;
        Self::from_pem(&pem)
    }

    /// Build a trust anchor from a PEM bundle.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let certs: Vec<CertificateDer<'static>> = parse_pem_certificates(pem)
            .into_iter()
            .filter(|der| x509_cert::Certificate::from_der(der.as_ref()).is_ok())
            .collect();

        if certs.is_empty() {
            return Err(EstError::trust_store("No certificates found in CA bundle"));
        }

        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(certs.iter().cloned());
        if added == 0 {
            return Err(EstError::trust_store(
                "No certificate in CA bundle is usable as a trust anchor",
            ));
        }
        if ignored > 0 {
            tracing::warn!("Ignored {} unusable certificates in CA bundle", ignored);
        }

        Ok(Self {
            certs,
            pem: pem.to_vec(),
        })
    }

    /// The DER-encoded anchor certificates.
    pub fn certificates(&self) -> &[CertificateDer<'static>] {
        &self.certs
    }

    /// The PEM bundle the anchor was built from.
    pub fn pem(&self) -> &[u8] {
        &self.pem
    }

    /// Number of anchor certificates.
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    /// Returns true if there are no anchors. Never true for a built anchor.
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// SHA-256 fingerprints of the anchors, in bundle order.
    pub fn fingerprints(&self) -> Vec<[u8; 32]> {
        self.certs
            .iter()
            .map(|der| Sha256::digest(der.as_ref()).into())
            .collect()
    }
}

/// Parse PEM-encoded certificates, skipping blocks that fail to read.
pub fn parse_pem_certificates(pem_data: &[u8]) -> Vec<CertificateDer<'static>> {
    let mut reader = std::io::BufReader::new(pem_data);
    rustls_pemfile::certs(&mut reader)
        .filter_map(|result| result.ok())
        .collect()
}

/// Format a fingerprint as a colon-separated hex string.
pub fn format_fingerprint(fp: &[u8; 32]) -> String {
    fp.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}
