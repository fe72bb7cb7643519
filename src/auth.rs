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

//! Authentication mode selection.
//!
//! The mode is a function of the renewal flag alone:
//!
//! - initial enrollment (`simpleenroll`) uses HTTP Basic credentials from
//!   the issuer's auth secret
//! - re-enrollment (`simplereenroll`) presents the previously issued
//!   certificate and key as a TLS client identity

use crate::error::{EstError, Result};
use crate::tls::ClientIdentity;
use crate::types::{operations, Secret};

/// Secret field holding the base64 username.
pub const USERNAME_KEY: &str = "username";

/// Secret field holding the base64 password.
pub const PASSWORD_KEY: &str = "password";

/// Secret field holding the PEM certificate of a prior issuance.
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Secret field holding the PEM private key of a prior issuance.
pub const TLS_KEY_KEY: &str = "tls.key";

/// HTTP Basic authentication credentials.
#[derive(Clone)]
pub struct HttpAuth {
    /// Account name.
    pub username: String,
    /// Account password.
    pub password: String,
}

impl HttpAuth {
    /// Decode credentials from an auth secret.
    pub fn from_secret(secret: &Secret) -> Result<Self> {
        Ok(Self {
            username: secret.decode_string(USERNAME_KEY)?,
            password: secret.decode_string(PASSWORD_KEY)?,
        })
    }

    /// Value for the `Authorization` header.
    pub fn header_value(&self) -> String {
        use base64::prelude::*;
        let credentials = BASE64_STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {}", credentials)
    }
}

impl std::fmt::Debug for HttpAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Credentials for a single enrollment attempt.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Username/password for initial enrollment.
    Basic(HttpAuth),
    /// Prior certificate and key for re-enrollment.
    Certificate(ClientIdentity),
}

impl Credentials {
    /// The EST operation these credentials are meant for.
    pub fn operation(&self) -> &'static str {
        match self {
            Credentials::Basic(_) => operations::SIMPLE_ENROLL,
            Credentials::Certificate(_) => operations::SIMPLE_REENROLL,
        }
    }

    /// Basic credentials, if this is the Basic variant.
    pub fn basic_auth(&self) -> Option<&HttpAuth> {
        match self {
            Credentials::Basic(auth) => Some(auth),
            Credentials::Certificate(_) => None,
        }
    }

    /// Client certificate, if this is the certificate variant.
    pub fn client_identity(&self) -> Option<&ClientIdentity> {
        match self {
            Credentials::Basic(_) => None,
            Credentials::Certificate(identity) => Some(identity),
        }
    }
}

/// Pick the credentials for an attempt.
///
/// `auth_secret` is the issuer's Basic auth secret; `tls_secret` holds the
/// prior issuance. Only the one matching the renewal flag is consulted.
///
/// # Errors
///
/// Returns [`EstError::MissingCredential`] if the required secret is
/// absent or its fields do not decode.
pub fn select_credentials(
    renewal: bool,
    auth_secret: Option<&Secret>,
    tls_secret: Option<&Secret>,
) -> Result<Credentials> {
    if renewal {
        let secret = tls_secret.ok_or_else(|| {
            EstError::missing_credential(
                "re-enrollment requires the TLS secret of a prior issuance",
            )
        })?;
        let cert_pem = secret.decode(TLS_CERT_KEY)?;
        let key_pem = secret.decode(TLS_KEY_KEY)?;
        let identity = ClientIdentity::new(cert_pem, key_pem).map_err(|e| {
            EstError::missing_credential(format!(
                "secret {} does not hold a usable certificate/key pair: {}",
                secret.key(),
                e
            ))
        })?;
        Ok(Credentials::Certificate(identity))
    } else {
        let secret = auth_secret
            .ok_or_else(|| EstError::missing_credential("issuer auth secret not found"))?;
        Ok(Credentials::Basic(HttpAuth::from_secret(secret)?))
    }
}
