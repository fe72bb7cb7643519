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

//! EST operator command-line entry point.
//!
//! # Usage
//!
//! ```text
//! est-operator [OPTIONS] --resources <PATH> <COMMAND>
//!
//! Commands:
//!   run   Reconcile issuers and orders until interrupted
//!   once  Run a single pass and print the resulting status
//!
//! Options:
//!   -c, --config <PATH>     Path to TOML configuration file
//!   -r, --resources <PATH>  Multi-document YAML with issuers, orders,
//!                           certificate requests and secrets
//!   -v, --verbose...        Raise log verbosity
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use usg_est_operator::client::HttpTransportFactory;
use usg_est_operator::engine::OrderEngine;
use usg_est_operator::readiness::ReadinessChecker;
use usg_est_operator::reconcile::{IssuerReconciler, OrderReconciler, Reconciler};
use usg_est_operator::scheduler::Controller;
use usg_est_operator::status::StatusReporter;
use usg_est_operator::store::{InMemoryStore, ResourceStore};
use usg_est_operator::types::{CertificateRequestStatus, IssuerStatus, OrderStatus};
use usg_est_operator::{logging, OperatorConfig};

/// EST certificate enrollment operator
#[derive(Parser)]
#[command(name = "est-operator")]
#[command(author = "U.S. Federal Government")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Certificate enrollment orders against EST (RFC 7030) servers", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Resource manifest to load
    #[arg(short, long, value_name = "PATH")]
    resources: PathBuf,

    /// Raise log verbosity (repeatable)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile issuers and orders until interrupted
    Run,

    /// Check every issuer, attempt every order once, print status as YAML
    Once,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    issuers: BTreeMap<String, IssuerStatus>,
    orders: BTreeMap<String, OrderStatus>,
    certificate_requests: BTreeMap<String, CertificateRequestStatus>,
}

struct Operator {
    store: Arc<InMemoryStore>,
    issuers: Arc<IssuerReconciler>,
    orders: Arc<OrderReconciler>,
}

impl Operator {
    fn new(config: &OperatorConfig, store: Arc<InMemoryStore>) -> Self {
        let transports = Arc::new(HttpTransportFactory::new(config.engine.request_timeout()));

        let checker = ReadinessChecker::new(
            store.clone(),
            transports.clone(),
            config.engine.well_known_path.clone(),
        );
        let issuers = IssuerReconciler::new(
            checker,
            config.scheduler.resync(),
            config.scheduler.max_backoff(),
        );

        let engine = OrderEngine::new(
            store.clone(),
            transports,
            config.engine.clone(),
            config.cluster.resource_namespace.clone(),
        );
        let orders = OrderReconciler::new(
            store.clone(),
            engine,
            StatusReporter::new(store.clone()),
            config.engine.error_backoff(),
        );

        Self {
            store,
            issuers: Arc::new(issuers),
            orders: Arc::new(orders),
        }
    }

    async fn run(&self, config: &OperatorConfig) -> usg_est_operator::Result<()> {
        let cancel = CancellationToken::new();

        let issuer_controller = Controller::new(self.issuers.clone(), &config.scheduler);
        issuer_controller.enqueue_all(self.store.list_issuers().await?.iter().map(|i| i.key()));

        let order_controller = Controller::new(self.orders.clone(), &config.scheduler);
        order_controller.enqueue_all(self.store.list_orders().await?.iter().map(|o| o.key()));

        let issuer_task = tokio::spawn(issuer_controller.run(cancel.clone()));
        let order_task = tokio::spawn(order_controller.run(cancel.clone()));

        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown requested");
        cancel.cancel();

        for task in [issuer_task, order_task] {
            if let Err(e) = task.await {
                tracing::error!("Controller task failed: {}", e);
            }
        }
        Ok(())
    }

    async fn once(&self) -> Result<Summary, Box<dyn std::error::Error>> {
        let cancel = CancellationToken::new();

        for issuer in self.store.list_issuers().await? {
            if let Err(e) = self.issuers.reconcile(&issuer.key(), &cancel).await {
                tracing::warn!(issuer = %issuer.key(), "Issuer pass failed: {}", e);
            }
        }
        for order in self.store.list_orders().await? {
            match self.orders.reconcile(&order.key(), &cancel).await {
                Ok(action) => tracing::debug!(order = %order.key(), "Next action: {:?}", action),
                Err(e) => tracing::warn!(order = %order.key(), "Order pass failed: {}", e),
            }
        }

        Ok(Summary {
            issuers: self
                .store
                .list_issuers()
                .await?
                .into_iter()
                .map(|i| (i.key().to_string(), i.status))
                .collect(),
            orders: self
                .store
                .list_orders()
                .await?
                .into_iter()
                .map(|o| (o.key().to_string(), o.status))
                .collect(),
            certificate_requests: self
                .store
                .list_certificate_requests()
                .await
                .into_iter()
                .map(|r| (r.key().to_string(), r.status))
                .collect(),
        })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match OperatorConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => OperatorConfig::default(),
    };

    if let Err(e) = logging::init(&config.logging, cli.verbose) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run_command(cli, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_command(cli: Cli, config: OperatorConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryStore::from_manifest_file(&cli.resources).await?);
    let operator = Operator::new(&config, store);

    match cli.command {
        Commands::Run => operator.run(&config).await?,
        Commands::Once => {
            let summary = operator.once().await?;
            print!("{}", serde_yaml::to_string(&summary)?);
        }
    }
    Ok(())
}
