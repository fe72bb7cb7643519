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

//! Integration test utilities and helpers
//!
//! Provides a wiremock-backed EST server, an rcgen PKI, a transport that
//! sends the engine's `https://` requests to the mock server, and a store
//! seeded with one issuer, one certificate request and its order.

mod engine_test;

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use chrono::Utc;
use der::Decode;
use rustls::pki_types::CertificateDer;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use usg_est_operator::auth::Credentials;
use usg_est_operator::client::{EstHttpClient, EstReply, EstTransport, TransportFactory};
use usg_est_operator::config::{EngineConfig, SchedulerConfig};
use usg_est_operator::engine::OrderEngine;
use usg_est_operator::readiness::ReadinessChecker;
use usg_est_operator::reconcile::OrderReconciler;
use usg_est_operator::status::StatusReporter;
use usg_est_operator::store::{InMemoryStore, ResourceStore};
use usg_est_operator::types::{
    encode_certs_only, CertificateRequest, CertificateRequestSpec, Condition, ConditionStatus,
    ConditionType, Issuer, IssuerRef, IssuerSpec, IssuerStatus, ObjectKey, ObjectMeta, Order,
    OrderSpec, OwnerReference, Secret, TLS_SECRET_ANNOTATION,
};
use usg_est_operator::TrustAnchor;

/// Content types used in EST protocol
pub const CONTENT_TYPE_PKCS7: &str = "application/pkcs7-mime";

/// EST operation paths
pub const PATH_CACERTS: &str = "/.well-known/est/cacerts";
pub const PATH_SIMPLEENROLL: &str = "/.well-known/est/simpleenroll";
pub const PATH_SIMPLEREENROLL: &str = "/.well-known/est/simplereenroll";

/// Namespace of the seeded objects
pub const NAMESPACE: &str = "apps";

/// Mock EST server builder for integration tests
pub struct MockEstServer {
    server: MockServer,
}

impl MockEstServer {
    /// Create a new mock EST server
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        Self { server }
    }

    /// Get the base URL of the mock server
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Get a reference to the inner MockServer for custom mocking
    pub fn inner(&self) -> &MockServer {
        &self.server
    }

    /// Mock a successful CA certificates response
    pub async fn mock_cacerts(&self, pkcs7_base64: &str) {
        Mock::given(method("GET"))
            .and(path(PATH_CACERTS))
            .respond_with(pkcs7_response(pkcs7_base64))
            .mount(&self.server)
            .await;
    }

    /// Mock a successful enrollment response (HTTP 200)
    pub async fn mock_enroll_success(&self, cert_pkcs7_base64: &str) {
        Mock::given(method("POST"))
            .and(path(PATH_SIMPLEENROLL))
            .respond_with(pkcs7_response(cert_pkcs7_base64))
            .mount(&self.server)
            .await;
    }

    /// Mock a pending enrollment response (HTTP 202) for the next `times` requests
    pub async fn mock_enroll_pending(&self, retry_after: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path(PATH_SIMPLEENROLL))
            .respond_with(ResponseTemplate::new(202).insert_header("Retry-After", retry_after))
            .up_to_n_times(times)
            .mount(&self.server)
            .await;
    }

    /// Mock an error response on the given path and method
    pub async fn mock_status(
        &self,
        http_method: &str,
        operation_path: &str,
        status: u16,
        body: &str,
    ) {
        Mock::given(method(http_method))
            .and(path(operation_path))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_string(body)
                    .insert_header("Content-Type", "text/plain"),
            )
            .mount(&self.server)
            .await;
    }

    /// Mock a successful re-enrollment response
    pub async fn mock_reenroll_success(&self, cert_pkcs7_base64: &str) {
        Mock::given(method("POST"))
            .and(path(PATH_SIMPLEREENROLL))
            .respond_with(pkcs7_response(cert_pkcs7_base64))
            .mount(&self.server)
            .await;
    }
}

/// What an HTTPS test server saw on one connection.
#[derive(Debug, Clone)]
pub struct TlsConnection {
    /// The client presented a certificate that chains to the test CA.
    pub client_certificate: bool,
    /// First line of the HTTP request; `None` if the handshake failed.
    pub request_line: Option<String>,
}

/// HTTPS EST server answering every request with one certs-only body.
///
/// Its certificate is issued by the test CA for 127.0.0.1. With
/// `require_client_certificate` the handshake fails unless the client
/// presents a certificate issued by the same CA.
pub struct TlsEstServer {
    addr: SocketAddr,
    connections: Arc<Mutex<Vec<TlsConnection>>>,
    task: tokio::task::JoinHandle<()>,
}

impl TlsEstServer {
    pub async fn start(pki: &Pki, require_client_certificate: bool, body: String) -> Self {
        let (cert_pem, key_pem) = pki.issue_server();
        let certs = rustls_pemfile::certs(&mut cert_pem.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let key = rustls_pemfile::private_key(&mut key_pem.as_bytes())
            .unwrap()
            .unwrap();

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = rustls::ServerConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .unwrap();
        let builder = if require_client_certificate {
            let mut roots = rustls::RootCertStore::empty();
            roots.add(pki.ca_der()).unwrap();
            let verifier = rustls::server::WebPkiClientVerifier::builder_with_provider(
                Arc::new(roots),
                provider,
            )
            .build()
            .unwrap();
            builder.with_client_cert_verifier(verifier)
        } else {
            builder.with_no_client_auth()
        };
        let config = builder.with_single_cert(certs, key).unwrap();

        let acceptor = TlsAcceptor::from(Arc::new(config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections: Arc<Mutex<Vec<TlsConnection>>> = Arc::default();

        let seen = Arc::clone(&connections);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                let seen = Arc::clone(&seen);
                let body = body.clone();
                tokio::spawn(async move {
                    let mut tls = match acceptor.accept(stream).await {
                        Ok(tls) => tls,
                        Err(_) => {
                            seen.lock().unwrap().push(TlsConnection {
                                client_certificate: false,
                                request_line: None,
                            });
                            return;
                        }
                    };
                    let client_certificate = tls
                        .get_ref()
                        .1
                        .peer_certificates()
                        .is_some_and(|certs| !certs.is_empty());
                    let request_line = read_request(&mut tls).await;
                    seen.lock().unwrap().push(TlsConnection {
                        client_certificate,
                        request_line: request_line.clone(),
                    });
                    if request_line.is_none() {
                        return;
                    }

                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        CONTENT_TYPE_PKCS7,
                        body.len(),
                        body
                    );
                    let _ = tls.write_all(response.as_bytes()).await;
                    let _ = tls.shutdown().await;
                });
            }
        });

        Self {
            addr,
            connections,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn connections(&self) -> Vec<TlsConnection> {
        self.connections.lock().unwrap().clone()
    }
}

impl Drop for TlsEstServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Read one HTTP/1.1 request and return its request line.
async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    head.lines().next().map(str::to_string)
}

fn pkcs7_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(body)
        .insert_header("Content-Type", CONTENT_TYPE_PKCS7)
        .insert_header("Content-Transfer-Encoding", "base64")
}

/// A throwaway CA that signs leaf certificates.
pub struct Pki {
    ca_cert: rcgen::Certificate,
    ca_key: rcgen::KeyPair,
}

impl Pki {
    pub fn new() -> Self {
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "EST Test Root CA");
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let ca_key = rcgen::KeyPair::generate().unwrap();
        let ca_cert = params.self_signed(&ca_key).unwrap();
        Self { ca_cert, ca_key }
    }

    /// The CA certificate as PEM.
    pub fn ca_pem(&self) -> String {
        self.ca_cert.pem()
    }

    /// The CA bundle as stored on an issuer.
    pub fn cacert_base64(&self) -> String {
        BASE64_STANDARD.encode(self.ca_pem())
    }

    /// The CA certificate as DER.
    pub fn ca_der(&self) -> CertificateDer<'static> {
        self.ca_cert.der().clone()
    }

    /// Issue a leaf certificate, returning (cert PEM, key PEM).
    pub fn issue(&self, common_name: &str) -> (String, String) {
        self.issue_with(common_name, |_| {})
    }

    /// Issue a TLS server certificate for 127.0.0.1.
    pub fn issue_server(&self) -> (String, String) {
        self.issue_with("127.0.0.1", |params| {
            params.subject_alt_names =
                vec![rcgen::SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST))];
            params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth];
        })
    }

    /// Issue a TLS client certificate.
    pub fn issue_client(&self, common_name: &str) -> (String, String) {
        self.issue_with(common_name, |params| {
            params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ClientAuth];
        })
    }

    fn issue_with(
        &self,
        common_name: &str,
        customize: impl FnOnce(&mut rcgen::CertificateParams),
    ) -> (String, String) {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec![common_name.to_string()]).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, common_name);
        customize(&mut params);
        let cert = params.signed_by(&key, &self.ca_cert, &self.ca_key).unwrap();
        (cert.pem(), key.serialize_pem())
    }

    /// A certs-only PKCS#7 body holding `leaf_pem` and the CA certificate.
    pub fn certs_only(&self, leaf_pem: &str) -> String {
        let certs: Vec<x509_cert::Certificate> = [leaf_pem.to_string(), self.ca_pem()]
            .iter()
            .map(|pem| {
                let der = TrustAnchor::from_pem(pem.as_bytes()).unwrap().certificates()[0].clone();
                x509_cert::Certificate::from_der(der.as_ref()).unwrap()
            })
            .collect();
        encode_certs_only(&certs).unwrap()
    }
}

/// A base64 DER CSR for `common_name`.
pub fn csr_base64(common_name: &str) -> String {
    let key = rcgen::KeyPair::generate().unwrap();
    let mut params = rcgen::CertificateParams::new(vec![common_name.to_string()]).unwrap();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, common_name);
    let csr = params.serialize_request(&key).unwrap();
    BASE64_STANDARD.encode(csr.der())
}

/// Secret with base64-encoded values.
pub fn secret(name: &str, entries: &[(&str, &[u8])]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: name.to_string(),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        data: entries
            .iter()
            .map(|(k, v)| (k.to_string(), BASE64_STANDARD.encode(v)))
            .collect::<BTreeMap<_, _>>(),
    }
}

/// Sends every request to the mock server, keeping only the path, and
/// records the URL the engine asked for.
pub struct MockTransportFactory {
    origin: Url,
    requested: Arc<Mutex<Vec<String>>>,
    credentials: Arc<Mutex<Vec<&'static str>>>,
}

impl MockTransportFactory {
    pub fn new(origin: &str) -> Self {
        Self {
            origin: Url::parse(origin).unwrap(),
            requested: Arc::default(),
            credentials: Arc::default(),
        }
    }

    /// URLs requested so far, as built by the engine.
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }

    /// Authentication mode of every transport created so far.
    pub fn credential_modes(&self) -> Vec<&'static str> {
        self.credentials.lock().unwrap().clone()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(
        &self,
        trust: &TrustAnchor,
        credentials: Option<&Credentials>,
    ) -> usg_est_operator::Result<Arc<dyn EstTransport>> {
        let mode = match credentials {
            Some(Credentials::Basic(_)) => "basic",
            Some(Credentials::Certificate(_)) => "certificate",
            None => "none",
        };
        self.credentials.lock().unwrap().push(mode);

        let inner = EstHttpClient::new(trust, credentials, Duration::from_secs(5))?;
        Ok(Arc::new(RedirectingTransport {
            inner,
            origin: self.origin.clone(),
            requested: Arc::clone(&self.requested),
        }))
    }
}

struct RedirectingTransport {
    inner: EstHttpClient,
    origin: Url,
    requested: Arc<Mutex<Vec<String>>>,
}

impl RedirectingTransport {
    fn rewrite(&self, url: &Url) -> Url {
        self.requested.lock().unwrap().push(url.to_string());
        let mut target = self.origin.clone();
        target.set_path(url.path());
        target
    }
}

#[async_trait]
impl EstTransport for RedirectingTransport {
    async fn fetch_ca_certs(&self, url: &Url) -> usg_est_operator::Result<EstReply> {
        self.inner.fetch_ca_certs(&self.rewrite(url)).await
    }

    async fn submit_csr(&self, url: &Url, csr_der: &[u8]) -> usg_est_operator::Result<EstReply> {
        self.inner.submit_csr(&self.rewrite(url), csr_der).await
    }
}

/// Issuer `apps/est`, its auth secret, certificate request `apps/web` and
/// the order `apps/web` owned by it, wired to a mock EST server.
pub struct Fixture {
    pub pki: Pki,
    pub mock: MockEstServer,
    pub store: Arc<InMemoryStore>,
    pub transports: Arc<MockTransportFactory>,
    pub engine_config: EngineConfig,
}

impl Fixture {
    pub async fn new() -> Self {
        let pki = Pki::new();
        let mock = MockEstServer::start().await;
        let transports = Arc::new(MockTransportFactory::new(&mock.url()));
        let store = Arc::new(InMemoryStore::new());

        store.insert_issuer(issuer(&pki, true)).await;
        store
            .insert_secret(secret(
                "est-auth",
                &[
                    ("username", b"user".as_slice()),
                    ("password", b"pass".as_slice()),
                ],
            ))
            .await;
        store.insert_certificate_request(certificate_request("web")).await;
        store.insert_order(order("web", false)).await;

        Self {
            pki,
            mock,
            store,
            transports,
            engine_config: EngineConfig::default(),
        }
    }

    pub fn issuer_key(&self) -> ObjectKey {
        ObjectKey::namespaced(NAMESPACE, "est")
    }

    pub fn order_key(&self) -> ObjectKey {
        ObjectKey::namespaced(NAMESPACE, "web")
    }

    pub fn engine(&self) -> OrderEngine {
        OrderEngine::new(
            self.store.clone(),
            self.transports.clone(),
            self.engine_config.clone(),
            "est-operator",
        )
    }

    pub fn reporter(&self) -> StatusReporter {
        StatusReporter::new(self.store.clone())
    }

    pub fn checker(&self) -> ReadinessChecker {
        ReadinessChecker::new(
            self.store.clone(),
            self.transports.clone(),
            self.engine_config.well_known_path.clone(),
        )
    }

    pub fn order_reconciler(&self) -> OrderReconciler {
        OrderReconciler::new(
            self.store.clone(),
            self.engine(),
            self.reporter(),
            self.engine_config.error_backoff(),
        )
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            workers: 2,
            initial_backoff_ms: 10,
            max_backoff_secs: 1,
            resync_secs: 600,
        }
    }

    pub async fn order(&self) -> Order {
        self.store.get_order(&self.order_key()).await.unwrap()
    }

    pub async fn certificate_request(&self) -> CertificateRequest {
        self.store
            .get_certificate_request(&self.order_key())
            .await
            .unwrap()
    }

    /// Replace the issuer with one that is or is not ready.
    pub async fn set_issuer_ready(&self, ready: bool) {
        self.store.insert_issuer(issuer(&self.pki, ready)).await;
    }

    /// Replace the seeded order.
    pub async fn set_order(&self, order: Order) {
        self.store.insert_order(order).await;
    }
}

pub fn issuer(pki: &Pki, ready: bool) -> Issuer {
    let mut status = IssuerStatus::default();
    if ready {
        status.conditions.push(Condition::new(
            ConditionType::Ready,
            ConditionStatus::True,
            "Verified",
            "EST server returned 1 CA certificates",
            Utc::now(),
        ));
    }
    Issuer {
        metadata: ObjectMeta {
            name: "est".to_string(),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: IssuerSpec {
            hostname: "est.example.com".to_string(),
            port: 8443,
            label: None,
            well_known_path: None,
            cacert: pki.cacert_base64(),
            auth_secret_name: "est-auth".to_string(),
        },
        status,
    }
}

/// Issuer `apps/est` served by a [`TlsEstServer`] on 127.0.0.1, trusting
/// the CA bundle `cacert`.
pub fn tls_issuer(pki: &Pki, port: u16, cacert: String, ready: bool) -> Issuer {
    let mut issuer = issuer(pki, ready);
    issuer.spec.hostname = "127.0.0.1".to_string();
    issuer.spec.port = port;
    issuer.spec.cacert = cacert;
    issuer
}

pub fn certificate_request(name: &str) -> CertificateRequest {
    CertificateRequest {
        metadata: ObjectMeta {
            name: name.to_string(),
            namespace: Some(NAMESPACE.to_string()),
            annotations: [(TLS_SECRET_ANNOTATION.to_string(), format!("{}-tls", name))]
                .into_iter()
                .collect(),
            ..Default::default()
        },
        spec: CertificateRequestSpec {
            issuer_ref: IssuerRef::est_issuer("est"),
            request: csr_base64("web.example.com"),
        },
        status: Default::default(),
    }
}

pub fn order(name: &str, renewal: bool) -> Order {
    Order {
        metadata: ObjectMeta {
            name: name.to_string(),
            namespace: Some(NAMESPACE.to_string()),
            owner_references: vec![OwnerReference {
                api_version: "cert-manager.io/v1".to_string(),
                kind: "CertificateRequest".to_string(),
                name: name.to_string(),
                controller: true,
            }],
            ..Default::default()
        },
        spec: OrderSpec {
            issuer_ref: IssuerRef::est_issuer("est"),
            request: csr_base64(&format!("{}.example.com", name)),
            renewal,
        },
        status: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let mock_server = MockEstServer::start().await;
        assert!(mock_server.url().starts_with("http://"));
    }

    #[test]
    fn test_pki_certs_only_parses() {
        let pki = Pki::new();
        let (leaf, _) = pki.issue("device.example.com");
        let body = pki.certs_only(&leaf);
        let chain = usg_est_operator::types::parse_enrollment_body(body.as_bytes()).unwrap();
        assert_eq!(chain.len(), 2);
    }
}
