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

//! TLS configuration helpers for EST connections.
//!
//! RFC 7030 Section 3.3.1 requires TLS 1.1 or later; TLS 1.2 is the floor
//! here since 1.1 is deprecated.

use std::time::Duration;

use rustls::pki_types::PrivateKeyDer;

use crate::error::{EstError, Result};
use crate::trust::{parse_pem_certificates, TrustAnchor};

/// Client certificate and private key presented during the TLS handshake.
#[derive(Clone)]
pub struct ClientIdentity {
    /// PEM-encoded certificate chain, leaf first.
    pub cert_pem: Vec<u8>,
    /// PEM-encoded private key.
    pub key_pem: Vec<u8>,
}

impl ClientIdentity {
    /// Create a client identity after checking both halves parse.
    pub fn new(cert_pem: Vec<u8>, key_pem: Vec<u8>) -> Result<Self> {
        if parse_pem_certificates(&cert_pem).is_empty() {
            return Err(EstError::invalid_pem("No certificates found in client certificate"));
        }
        parse_pem_private_key(&key_pem)?;
        Ok(Self { cert_pem, key_pem })
    }
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("cert_pem", &format!("<{} bytes>", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

/// Build a reqwest Client that trusts only the given anchors.
pub fn build_http_client(
    trust: &TrustAnchor,
    identity: Option<&ClientIdentity>,
    timeout: Duration,
    user_agent: &str,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .use_rustls_tls()
        .tls_built_in_root_certs(false)
        .min_tls_version(reqwest::tls::Version::TLS_1_2);

    for der in trust.certificates() {
        let cert = reqwest::Certificate::from_der(der.as_ref())
            .map_err(|e| EstError::tls(format!("Failed to load CA certificate: {}", e)))?;
        builder = builder.add_root_certificate(cert);
    }

    if let Some(identity) = identity {
        builder = builder.identity(build_reqwest_identity(identity)?);
    }

    builder
        .build()
        .map_err(|e| EstError::tls(format!("Failed to build HTTP client: {}", e)))
}

/// Build a reqwest Identity from PEM-encoded certificate and key.
fn build_reqwest_identity(identity: &ClientIdentity) -> Result<reqwest::Identity> {
    let mut pem_data = identity.cert_pem.clone();
    pem_data.extend_from_slice(b"\n");
    pem_data.extend_from_slice(&identity.key_pem);

    reqwest::Identity::from_pem(&pem_data)
        .map_err(|e| EstError::tls(format!("Failed to create client identity: {}", e)))
}

/// Parse a PEM-encoded private key.
pub fn parse_pem_private_key(pem_data: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut reader = std::io::BufReader::new(pem_data);

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(rustls_pemfile::Item::Pkcs8Key(key))) => {
                return Ok(PrivateKeyDer::Pkcs8(key));
            }
            Ok(Some(rustls_pemfile::Item::Pkcs1Key(key))) => {
                return Ok(PrivateKeyDer::Pkcs1(key));
            }
            Ok(Some(rustls_pemfile::Item::Sec1Key(key))) => {
                return Ok(PrivateKeyDer::Sec1(key));
            }
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                return Err(EstError::invalid_pem(format!("Failed to parse PEM: {}", e)));
            }
        }
    }

    Err(EstError::invalid_pem("No private key found in PEM data"))
}
