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

//! Resource persistence.
//!
//! [`ResourceStore`] is the only way the reconcilers read objects or write
//! status. [`InMemoryStore`] backs the binary and the tests and can be
//! seeded from multi-document YAML manifests.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::{EstError, Result};
use crate::types::{
    CertificateRequest, CertificateRequestStatus, Issuer, IssuerStatus, ObjectKey, Order,
    OrderStatus, Secret,
};

/// Namespace assigned to namespaced manifests that omit one.
const DEFAULT_NAMESPACE: &str = "default";

/// Read access to resources and write access to their status.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch an issuer. Cluster-scoped issuers have a key without namespace.
    async fn get_issuer(&self, key: &ObjectKey) -> Result<Issuer>;

    /// List every issuer, namespaced and cluster-scoped.
    async fn list_issuers(&self) -> Result<Vec<Issuer>>;

    /// Fetch an order.
    async fn get_order(&self, key: &ObjectKey) -> Result<Order>;

    /// List every order.
    async fn list_orders(&self) -> Result<Vec<Order>>;

    /// Fetch a secret.
    async fn get_secret(&self, key: &ObjectKey) -> Result<Secret>;

    /// Fetch a certificate request.
    async fn get_certificate_request(&self, key: &ObjectKey) -> Result<CertificateRequest>;

    /// Replace an issuer's status.
    ///
    /// # Errors
    ///
    /// Returns [`EstError::Persistence`] if the write fails.
    async fn update_issuer_status(&self, key: &ObjectKey, status: IssuerStatus) -> Result<()>;

    /// Replace an order's status.
    async fn update_order_status(&self, key: &ObjectKey, status: OrderStatus) -> Result<()>;

    /// Replace a certificate request's status.
    async fn update_certificate_request_status(
        &self,
        key: &ObjectKey,
        status: CertificateRequestStatus,
    ) -> Result<()>;
}

/// A resource document in a YAML manifest.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind")]
enum Manifest {
    EstIssuer(Issuer),
    ClusterEstIssuer(Issuer),
    #[serde(alias = "Order")]
    EstOrder(Order),
    CertificateRequest(CertificateRequest),
    Secret(Secret),
}

/// Resource store held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    issuers: RwLock<BTreeMap<ObjectKey, Issuer>>,
    orders: RwLock<BTreeMap<ObjectKey, Order>>,
    secrets: RwLock<BTreeMap<ObjectKey, Secret>>,
    requests: RwLock<BTreeMap<ObjectKey, CertificateRequest>>,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load resources from a multi-document YAML manifest file.
    pub async fn from_manifest_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let store = Self::new();
        let count = store.load_manifest(&content).await?;
        tracing::info!(
            "Loaded {} resources from {}",
            count,
            path.as_ref().display()
        );
        Ok(store)
    }

    /// Load resources from a multi-document YAML string.
    ///
    /// Returns the number of resources loaded. Empty documents are skipped.
    pub async fn load_manifest(&self, yaml: &str) -> Result<usize> {
        let manifests = parse_manifest(yaml)?;
        let count = manifests.len();
        for manifest in manifests {
            self.insert_manifest(manifest).await?;
        }
        Ok(count)
    }

    async fn insert_manifest(&self, manifest: Manifest) -> Result<()> {
        match manifest {
            Manifest::EstIssuer(mut issuer) => {
                default_namespace(&mut issuer.metadata.namespace);
                self.insert_issuer(issuer).await;
            }
            Manifest::ClusterEstIssuer(issuer) => {
                if issuer.metadata.namespace.is_some() {
                    return Err(EstError::manifest(format!(
                        "ClusterEstIssuer {} must not have a namespace",
                        issuer.metadata.name
                    )));
                }
                self.insert_issuer(issuer).await;
            }
            Manifest::EstOrder(mut order) => {
                default_namespace(&mut order.metadata.namespace);
                self.insert_order(order).await;
            }
            Manifest::CertificateRequest(mut request) => {
                default_namespace(&mut request.metadata.namespace);
                self.insert_certificate_request(request).await;
            }
            Manifest::Secret(mut secret) => {
                default_namespace(&mut secret.metadata.namespace);
                self.insert_secret(secret).await;
            }
        }
        Ok(())
    }

    /// Insert or replace an issuer.
    pub async fn insert_issuer(&self, issuer: Issuer) {
        self.issuers.write().await.insert(issuer.key(), issuer);
    }

    /// Insert or replace an order.
    pub async fn insert_order(&self, order: Order) {
        self.orders.write().await.insert(order.key(), order);
    }

    /// Insert or replace a secret.
    pub async fn insert_secret(&self, secret: Secret) {
        self.secrets.write().await.insert(secret.key(), secret);
    }

    /// Insert or replace a certificate request.
    pub async fn insert_certificate_request(&self, request: CertificateRequest) {
        self.requests.write().await.insert(request.key(), request);
    }

    /// Make every subsequent status write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of every certificate request.
    pub async fn list_certificate_requests(&self) -> Vec<CertificateRequest> {
        self.requests.read().await.values().cloned().collect()
    }

    fn check_writable(&self, kind: &str, key: &ObjectKey) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(EstError::persistence(format!(
                "status write for {} {} refused",
                kind, key
            )));
        }
        Ok(())
    }
}

fn parse_manifest(yaml: &str) -> Result<Vec<Manifest>> {
    let mut manifests = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(yaml).enumerate() {
        let value = serde_yaml::Value::deserialize(document)
            .map_err(|e| EstError::manifest(format!("document {}: {}", index, e)))?;
        if value.is_null() {
            continue;
        }
        let manifest = serde_yaml::from_value(value)
            .map_err(|e| EstError::manifest(format!("document {}: {}", index, e)))?;
        manifests.push(manifest);
    }
    Ok(manifests)
}

fn default_namespace(namespace: &mut Option<String>) {
    if namespace.is_none() {
        *namespace = Some(DEFAULT_NAMESPACE.to_string());
    }
}

fn lookup<T: Clone>(
    map: &BTreeMap<ObjectKey, T>,
    kind: &'static str,
    key: &ObjectKey,
) -> Result<T> {
    map.get(key)
        .cloned()
        .ok_or_else(|| EstError::not_found(kind, key.to_string()))
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get_issuer(&self, key: &ObjectKey) -> Result<Issuer> {
        lookup(&*self.issuers.read().await, "issuer", key)
    }

    async fn list_issuers(&self) -> Result<Vec<Issuer>> {
        Ok(self.issuers.read().await.values().cloned().collect())
    }

    async fn get_order(&self, key: &ObjectKey) -> Result<Order> {
        lookup(&*self.orders.read().await, "order", key)
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        Ok(self.orders.read().await.values().cloned().collect())
    }

    async fn get_secret(&self, key: &ObjectKey) -> Result<Secret> {
        lookup(&*self.secrets.read().await, "secret", key)
    }

    async fn get_certificate_request(&self, key: &ObjectKey) -> Result<CertificateRequest> {
        lookup(&*self.requests.read().await, "certificate request", key)
    }

    async fn update_issuer_status(&self, key: &ObjectKey, status: IssuerStatus) -> Result<()> {
        self.check_writable("issuer", key)?;
        let mut issuers = self.issuers.write().await;
        let issuer = issuers
            .get_mut(key)
            .ok_or_else(|| EstError::persistence(format!("issuer {} no longer exists", key)))?;
        issuer.status = status;
        Ok(())
    }

    async fn update_order_status(&self, key: &ObjectKey, status: OrderStatus) -> Result<()> {
        self.check_writable("order", key)?;
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(key)
            .ok_or_else(|| EstError::persistence(format!("order {} no longer exists", key)))?;
        order.status = status;
        Ok(())
    }

    async fn update_certificate_request_status(
        &self,
        key: &ObjectKey,
        status: CertificateRequestStatus,
    ) -> Result<()> {
        self.check_writable("certificate request", key)?;
        let mut requests = self.requests.write().await;
        let request = requests.get_mut(key).ok_or_else(|| {
            EstError::persistence(format!("certificate request {} no longer exists", key))
        })?;
        request.status = status;
        Ok(())
    }
}
