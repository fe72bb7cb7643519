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

//! PKCS#7/CMS parsing utilities.
//!
//! EST returns certificates in a degenerate "certs-only" SignedData
//! structure, base64-encoded, for `/cacerts`, `/simpleenroll`, and
//! `/simplereenroll`.

use base64::prelude::*;
use cms::cert::CertificateChoices;
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{CertificateSet, EncapsulatedContentInfo, SignedData, SignerInfos};
use const_oid::db::rfc5911::{ID_DATA, ID_SIGNED_DATA};
use der::asn1::SetOfVec;
use der::pem::LineEnding;
use der::{Any, Decode, Encode, EncodePem};
use x509_cert::Certificate;

use crate::error::{EstError, Result};

/// An ordered collection of X.509 certificates.
///
/// Returned by `/cacerts` and carried by an issued order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateChain {
    /// The certificates, in the order the server sent them.
    pub certificates: Vec<Certificate>,
}

impl CertificateChain {
    /// Create a new chain.
    pub fn new(certificates: Vec<Certificate>) -> Self {
        Self { certificates }
    }

    /// Returns true if the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Returns the number of certificates.
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// The first certificate, which for enrollment responses is the issued one.
    pub fn leaf(&self) -> Option<&Certificate> {
        self.certificates.first()
    }

    /// Iterate over the certificates.
    pub fn iter(&self) -> impl Iterator<Item = &Certificate> {
        self.certificates.iter()
    }

    /// Encode the chain as concatenated PEM blocks.
    pub fn to_pem(&self) -> Result<String> {
        let mut pem = String::new();
        for cert in &self.certificates {
            let block = cert.to_pem(LineEnding::LF).map_err(|e| {
                EstError::certificate_parsing(format!("Failed to encode certificate: {}", e))
            })?;
            pem.push_str(&block);
        }
        Ok(pem)
    }
}

impl IntoIterator for CertificateChain {
    type Item = Certificate;
    type IntoIter = std::vec::IntoIter<Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.certificates.into_iter()
    }
}

/// Parse a PKCS#7 certs-only response.
///
/// The response body should be base64-encoded DER.
pub fn parse_certs_only(body: &[u8]) -> Result<Vec<Certificate>> {
    let der_bytes = decode_base64(body)?;

    let content_info = ContentInfo::from_der(&der_bytes)
        .map_err(|e| EstError::cms_parsing(format!("Failed to parse ContentInfo: {}", e)))?;

    let signed_data = extract_signed_data(&content_info)?;

    extract_certificates(&signed_data)
}

/// Parse an enrollment response body into the issued chain.
///
/// Accepts the RFC 7030 base64 certs-only form and, for servers that answer
/// with plain PEM, a PEM certificate bundle.
pub fn parse_enrollment_body(body: &[u8]) -> Result<CertificateChain> {
    let certs = if looks_like_pem(body) {
        parse_pem_bundle(body)?
    } else {
        parse_certs_only(body)?
    };

    if certs.is_empty() {
        return Err(EstError::cms_parsing("No certificate in enrollment response"));
    }

    Ok(CertificateChain::new(certs))
}

/// Build a base64-encoded certs-only SignedData for the given certificates.
///
/// This is the same shape an EST server returns from `/simpleenroll`.
pub fn encode_certs_only(certs: &[Certificate]) -> Result<String> {
    let choices: Vec<CertificateChoices> = certs
        .iter()
        .cloned()
        .map(CertificateChoices::Certificate)
        .collect();
    let cert_set = SetOfVec::try_from(choices)
        .map_err(|e| EstError::cms_parsing(format!("Failed to build certificate set: {}", e)))?;

    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::new(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: ID_DATA,
            econtent: None,
        },
        certificates: Some(CertificateSet(cert_set)),
        crls: None,
        signer_infos: SignerInfos(SetOfVec::new()),
    };

    let content = Any::encode_from(&signed_data)
        .map_err(|e| EstError::cms_parsing(format!("Failed to encode SignedData: {}", e)))?;
    let content_info = ContentInfo {
        content_type: ID_SIGNED_DATA,
        content,
    };
    let der = content_info
        .to_der()
        .map_err(|e| EstError::cms_parsing(format!("Failed to encode ContentInfo: {}", e)))?;

    Ok(BASE64_STANDARD.encode(der))
}

fn looks_like_pem(body: &[u8]) -> bool {
    body.windows(10).any(|w| w == b"-----BEGIN")
}

fn parse_pem_bundle(body: &[u8]) -> Result<Vec<Certificate>> {
    let mut reader = std::io::BufReader::new(body);
    let mut certs = Vec::new();
    for der in rustls_pemfile::certs(&mut reader) {
        let der = der.map_err(|e| EstError::invalid_pem(format!("Failed to read PEM: {}", e)))?;
        let cert = Certificate::from_der(der.as_ref()).map_err(|e| {
            EstError::certificate_parsing(format!("Failed to parse certificate: {}", e))
        })?;
        certs.push(cert);
    }
    Ok(certs)
}

/// Decode base64 data, handling various line ending formats.
fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    BASE64_STANDARD.decode(&cleaned).map_err(EstError::Decode)
}

/// Extract SignedData from ContentInfo.
fn extract_signed_data(content_info: &ContentInfo) -> Result<SignedData> {
    if content_info.content_type != ID_SIGNED_DATA {
        return Err(EstError::cms_parsing(format!(
            "Expected SignedData OID, got {}",
            content_info.content_type
        )));
    }

    let content = content_info
        .content
        .to_der()
        .map_err(|e| EstError::cms_parsing(format!("Failed to encode content: {}", e)))?;

    SignedData::from_der(&content)
        .map_err(|e| EstError::cms_parsing(format!("Failed to parse SignedData: {}", e)))
}

/// Extract certificates from SignedData.
fn extract_certificates(signed_data: &SignedData) -> Result<Vec<Certificate>> {
    let cert_set = match &signed_data.certificates {
        Some(certs) => certs,
        None => return Ok(Vec::new()),
    };

    let mut certificates = Vec::new();

    for cert_choice in cert_set.0.iter() {
        // Only plain X.509 certificates are meaningful here
        match cert_choice {
            CertificateChoices::Certificate(cert) => certificates.push(cert.clone()),
            _ => {
                tracing::warn!("Skipping non-X.509 certificate choice");
            }
        }
    }

    Ok(certificates)
}
