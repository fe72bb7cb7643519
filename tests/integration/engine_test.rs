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

//! Order engine attempts against a mock EST server

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use usg_est_operator::engine::OrderEngine;
use usg_est_operator::types::{parse_enrollment_body, OrderOutcome};
use usg_est_operator::EstError;

use super::{issuer, Fixture, MockTransportFactory, PATH_SIMPLEENROLL};

async fn execute(
    fixture: &Fixture,
) -> usg_est_operator::Result<usg_est_operator::engine::Attempt> {
    fixture
        .engine()
        .execute(&fixture.order().await, &CancellationToken::new())
        .await
}

#[tokio::test]
async fn test_issued_with_chain() {
    let fixture = Fixture::new().await;
    let (leaf, _) = fixture.pki.issue("web.example.com");
    let body = fixture.pki.certs_only(&leaf);
    fixture.mock.mock_enroll_success(&body).await;

    let attempt = execute(&fixture).await.unwrap();

    let expected = parse_enrollment_body(body.as_bytes()).unwrap();
    assert_eq!(attempt.outcome, OrderOutcome::issued(expected));
    assert_eq!(attempt.ca, fixture.pki.cacert_base64());
    assert!(attempt.attempted_at.is_some());
}

#[tokio::test]
async fn test_pending_with_seconds() {
    let fixture = Fixture::new().await;
    fixture.mock.mock_enroll_pending("120", 1).await;

    let attempt = execute(&fixture).await.unwrap();
    assert_eq!(
        attempt.outcome,
        OrderOutcome::pending(Duration::from_secs(120))
    );
    assert_eq!(
        attempt.outcome.requeue_after(Duration::from_secs(600)),
        Some(Duration::from_secs(120))
    );
}

#[tokio::test]
async fn test_pending_with_duration_string() {
    let fixture = Fixture::new().await;
    fixture.mock.mock_enroll_pending("2m", 1).await;

    let attempt = execute(&fixture).await.unwrap();
    assert_eq!(
        attempt.outcome,
        OrderOutcome::pending(Duration::from_secs(120))
    );
}

#[tokio::test]
async fn test_pending_with_unparseable_hint() {
    let fixture = Fixture::new().await;
    fixture.mock.mock_enroll_pending("soon", 1).await;

    let attempt = execute(&fixture).await.unwrap();
    match attempt.outcome {
        OrderOutcome::Pending {
            retry_after,
            warning,
        } => {
            assert_eq!(retry_after, Duration::from_secs(60));
            assert!(warning.unwrap().contains("soon"));
        }
        other => panic!("expected pending, got {:?}", other),
    }
}

#[tokio::test]
async fn test_pending_without_hint() {
    let fixture = Fixture::new().await;
    Mock::given(method("POST"))
        .and(path(PATH_SIMPLEENROLL))
        .respond_with(ResponseTemplate::new(202))
        .mount(fixture.mock.inner())
        .await;

    let attempt = execute(&fixture).await.unwrap();
    match attempt.outcome {
        OrderOutcome::Pending {
            retry_after,
            warning,
        } => {
            assert_eq!(retry_after, Duration::from_secs(60));
            assert!(warning.is_some());
        }
        other => panic!("expected pending, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rejected_by_server() {
    let fixture = Fixture::new().await;
    fixture
        .mock
        .mock_status("POST", PATH_SIMPLEENROLL, 404, "unknown profile")
        .await;

    let attempt = execute(&fixture).await.unwrap();
    assert_eq!(
        attempt.outcome,
        OrderOutcome::rejected(Some(404), "404 Not Found: unknown profile")
    );
    assert_eq!(
        attempt.outcome.requeue_after(Duration::from_secs(600)),
        Some(Duration::from_secs(600))
    );
}

#[tokio::test]
async fn test_server_error() {
    let fixture = Fixture::new().await;
    fixture
        .mock
        .mock_status("POST", PATH_SIMPLEENROLL, 503, "")
        .await;

    let attempt = execute(&fixture).await.unwrap();
    assert_eq!(
        attempt.outcome,
        OrderOutcome::server_error(Some(503), "503 Service Unavailable")
    );
}

#[tokio::test]
async fn test_malformed_success_body() {
    let fixture = Fixture::new().await;
    fixture.mock.mock_enroll_success("not pkcs7").await;

    let attempt = execute(&fixture).await.unwrap();
    match attempt.outcome {
        OrderOutcome::ServerError { status, reason } => {
            assert_eq!(status, Some(200));
            assert!(reason.starts_with("malformed enrollment response"));
        }
        other => panic!("expected server error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_server() {
    let fixture = Fixture::new().await;
    let engine = OrderEngine::new(
        fixture.store.clone(),
        Arc::new(MockTransportFactory::new("http://127.0.0.1:1")),
        fixture.engine_config.clone(),
        "est-operator",
    );

    let attempt = engine
        .execute(&fixture.order().await, &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(
        attempt.outcome,
        OrderOutcome::ServerError { status: None, .. }
    ));
    assert!(attempt.attempted_at.is_some());
}

#[tokio::test]
async fn test_invalid_csr_is_rejected_without_request() {
    let fixture = Fixture::new().await;
    let mut order = fixture.order().await;
    order.spec.request = "bm90IGEgY3Ny".to_string();
    fixture.set_order(order).await;

    let attempt = execute(&fixture).await.unwrap();
    assert!(matches!(
        attempt.outcome,
        OrderOutcome::Rejected { status: None, .. }
    ));
    assert!(attempt.attempted_at.is_none());
    assert_eq!(attempt.outcome.requeue_after(Duration::from_secs(600)), None);
    assert!(fixture.transports.requested().is_empty());
}

#[tokio::test]
async fn test_issuer_not_ready() {
    let fixture = Fixture::new().await;
    fixture.set_issuer_ready(false).await;

    let err = execute(&fixture).await.unwrap_err();
    assert!(matches!(err, EstError::IssuerNotReady(_)));
    assert!(fixture.transports.requested().is_empty());
}

#[tokio::test]
async fn test_label_in_path() {
    let fixture = Fixture::new().await;
    let mut labelled = issuer(&fixture.pki, true);
    labelled.spec.label = Some("arbitrary".to_string());
    fixture.store.insert_issuer(labelled).await;

    let (leaf, _) = fixture.pki.issue("web.example.com");
    Mock::given(method("POST"))
        .and(path("/.well-known/est/arbitrary/simpleenroll"))
        .respond_with(ResponseTemplate::new(200).set_body_string(fixture.pki.certs_only(&leaf)))
        .mount(fixture.mock.inner())
        .await;

    let attempt = execute(&fixture).await.unwrap();
    assert!(attempt.outcome.is_issued());
    assert_eq!(
        fixture.transports.requested(),
        vec!["https://est.example.com:8443/.well-known/est/arbitrary/simpleenroll".to_string()]
    );
}

#[tokio::test]
async fn test_cancelled_during_exchange() {
    let fixture = Fixture::new().await;
    Mock::given(method("POST"))
        .and(path(PATH_SIMPLEENROLL))
        .respond_with(ResponseTemplate::new(202).set_delay(Duration::from_secs(10)))
        .mount(fixture.mock.inner())
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = fixture
        .engine()
        .execute(&fixture.order().await, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, EstError::Cancelled));
}
