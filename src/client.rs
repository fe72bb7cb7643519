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

//! EST transport.
//!
//! [`EstTransport`] is the narrow seam between the engine and the network:
//! one GET for `/cacerts` and one POST for `/simpleenroll` or
//! `/simplereenroll`. Both return the raw [`EstReply`]; interpreting status
//! codes is left to the caller so the classification lives in one place.
//!
//! [`EstHttpClient`] is the reqwest implementation. A new one is built for
//! every attempt by a [`TransportFactory`] and dropped afterwards.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use url::Url;

use crate::auth::{Credentials, HttpAuth};
use crate::error::Result;
use crate::tls::build_http_client;
use crate::trust::TrustAnchor;
use crate::types::content_types;

/// Header announcing the base64 transfer encoding of the CSR body.
pub const CONTENT_TRANSFER_ENCODING: &str = "content-transfer-encoding";

/// A raw EST server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstReply {
    /// HTTP status code.
    pub status: u16,
    /// Value of the `Retry-After` header, if present.
    pub retry_after: Option<String>,
    /// Response body.
    pub body: Vec<u8>,
}

impl EstReply {
    /// Body as lossy UTF-8, trimmed, for use in reasons and log lines.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).trim().to_string()
    }
}

/// One EST round trip.
#[async_trait]
pub trait EstTransport: Send + Sync {
    /// `GET {base}/cacerts`.
    async fn fetch_ca_certs(&self, url: &Url) -> Result<EstReply>;

    /// `POST {base}/simpleenroll` or `/simplereenroll` with a DER CSR.
    async fn submit_csr(&self, url: &Url, csr_der: &[u8]) -> Result<EstReply>;
}

/// Builds a transport for one attempt.
pub trait TransportFactory: Send + Sync {
    /// Create a transport bound to `trust` and optionally presenting
    /// `credentials`.
    fn create(
        &self,
        trust: &TrustAnchor,
        credentials: Option<&Credentials>,
    ) -> Result<Arc<dyn EstTransport>>;
}

/// reqwest-backed EST transport.
#[derive(Debug)]
pub struct EstHttpClient {
    http: reqwest::Client,
    basic_auth: Option<HttpAuth>,
}

impl EstHttpClient {
    /// Build a client that trusts only `trust`.
    ///
    /// Certificate credentials are installed as the TLS client identity;
    /// Basic credentials are sent with every enrollment request.
    pub fn new(
        trust: &TrustAnchor,
        credentials: Option<&Credentials>,
        timeout: Duration,
    ) -> Result<Self> {
        let identity = credentials.and_then(Credentials::client_identity);
        let http = build_http_client(trust, identity, timeout, crate::USER_AGENT)?;

        Ok(Self {
            http,
            basic_auth: credentials.and_then(Credentials::basic_auth).cloned(),
        })
    }

    /// The Basic credentials this client sends, if any.
    pub fn basic_auth(&self) -> Option<&HttpAuth> {
        self.basic_auth.as_ref()
    }

    fn add_auth_header(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.basic_auth {
            Some(auth) => request.header(AUTHORIZATION, auth.header_value()),
            None => request,
        }
    }

    async fn into_reply(response: reqwest::Response) -> Result<EstReply> {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string());
        let body = response.bytes().await?.to_vec();

        Ok(EstReply {
            status,
            retry_after,
            body,
        })
    }
}

#[async_trait]
impl EstTransport for EstHttpClient {
    async fn fetch_ca_certs(&self, url: &Url) -> Result<EstReply> {
        tracing::debug!("GET {}", url);
        let response = self.http.get(url.clone()).send().await?;
        Self::into_reply(response).await
    }

    async fn submit_csr(&self, url: &Url, csr_der: &[u8]) -> Result<EstReply> {
        tracing::debug!("POST {}", url);

        let body = BASE64_STANDARD.encode(csr_der);
        let request = self
            .http
            .post(url.clone())
            .header(CONTENT_TYPE, content_types::PKCS10)
            .header(CONTENT_TRANSFER_ENCODING, "base64")
            .body(body);

        let response = self.add_auth_header(request).send().await?;
        Self::into_reply(response).await
    }
}

/// Default factory producing [`EstHttpClient`]s.
#[derive(Debug, Clone)]
pub struct HttpTransportFactory {
    timeout: Duration,
}

impl HttpTransportFactory {
    /// Create a factory whose clients use `timeout` per request.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl TransportFactory for HttpTransportFactory {
    fn create(
        &self,
        trust: &TrustAnchor,
        credentials: Option<&Credentials>,
    ) -> Result<Arc<dyn EstTransport>> {
        Ok(Arc::new(EstHttpClient::new(trust, credentials, self.timeout)?))
    }
}
