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

//! PKCS#10 request decoding.
//!
//! Orders carry their CSR base64-encoded. The decoded bytes may be DER or a
//! PEM `CERTIFICATE REQUEST` block; either way the result is checked to be
//! a well-formed `CertificationRequest` before it is sent anywhere.

use base64::prelude::*;
use der::Decode;
use x509_cert::request::CertReq;

use crate::error::{EstError, Result};

/// A CSR ready to submit.
#[derive(Debug, Clone)]
pub struct DecodedCsr {
    /// DER encoding of the request.
    pub der: Vec<u8>,
    /// Subject distinguished name, for logging.
    pub subject: String,
}

/// Decode and validate an order's CSR.
///
/// # Errors
///
/// Returns [`EstError::Csr`] if any layer fails to decode.
pub fn decode_request(encoded: &str) -> Result<DecodedCsr> {
    let cleaned: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if cleaned.is_empty() {
        return Err(EstError::csr("request is empty"));
    }

    let raw = BASE64_STANDARD
        .decode(cleaned)
        .map_err(|e| EstError::csr(format!("request is not valid base64: {}", e)))?;

    let der = if raw.starts_with(b"-----BEGIN") {
        pem_to_der(&raw)?
    } else {
        raw
    };

    let request = CertReq::from_der(&der)
        .map_err(|e| EstError::csr(format!("request is not a PKCS#10 CSR: {}", e)))?;

    Ok(DecodedCsr {
        subject: request.info.subject.to_string(),
        der,
    })
}

fn pem_to_der(pem: &[u8]) -> Result<Vec<u8>> {
    let mut reader = std::io::BufReader::new(pem);
    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(rustls_pemfile::Item::Csr(csr))) => return Ok(csr.as_ref().to_vec()),
            Ok(Some(_)) => continue,
            Ok(None) => return Err(EstError::csr("PEM request has no CERTIFICATE REQUEST block")),
            Err(e) => return Err(EstError::csr(format!("PEM request is malformed: {}", e))),
        }
    }
}
