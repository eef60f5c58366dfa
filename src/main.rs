//! Pravega Operator - Kubernetes lifecycle management for Pravega clusters

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;

use pravega_common::crd::PravegaCluster;
use pravega_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use pravega_common::{CRD_NAME, FIELD_MANAGER};
use pravega_operator::controller::{error_policy, reconcile, Context, OperatorConfig};
use pravega_operator::webhook::{webhook_router, WebhookState};
use pravega_operator::DEFAULT_WEBHOOK_ADDR;

/// Pravega Operator - manages Pravega clusters on Kubernetes
#[derive(Parser, Debug)]
#[command(name = "pravega-operator", version, about, long_about = None)]
struct Cli {
    /// Print the PravegaCluster CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Log output format (json or text)
    #[arg(long, global = true, env = "PRAVEGA_OPERATOR_LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the PravegaCluster controller (default mode)
    Controller(ControllerArgs),

    /// Serve the validating admission webhook
    Webhook(WebhookArgs),
}

/// Controller mode arguments
#[derive(Args, Debug, Default)]
struct ControllerArgs {
    /// Do not add the ZooKeeper cleanup finalizer to clusters
    #[arg(long, env = "PRAVEGA_OPERATOR_DISABLE_FINALIZER")]
    disable_finalizer: bool,

    /// Watch a single namespace instead of the whole cluster
    #[arg(long, env = "PRAVEGA_OPERATOR_WATCH_NAMESPACE")]
    watch_namespace: Option<String>,
}

/// Webhook mode arguments
#[derive(Args, Debug)]
struct WebhookArgs {
    /// Listen address
    #[arg(long, env = "PRAVEGA_OPERATOR_WEBHOOK_ADDR", default_value = DEFAULT_WEBHOOK_ADDR)]
    addr: SocketAddr,

    /// PEM certificate served to the API server
    #[arg(long, env = "PRAVEGA_OPERATOR_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key for the certificate
    #[arg(long, env = "PRAVEGA_OPERATOR_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Both the kube client and the webhook listener need a process-wide provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&PravegaCluster::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        format: cli.log_format,
    })?;

    match cli.command {
        Some(Commands::Webhook(args)) => run_webhook(args).await,
        Some(Commands::Controller(args)) => run_controller(args).await,
        None => run_controller(ControllerArgs::default()).await,
    }
}

/// Install or update the PravegaCluster CRD with a forced server-side apply
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing PravegaCluster CRD...");
    crds.patch(CRD_NAME, &params, &Patch::Apply(&PravegaCluster::crd()))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to install PravegaCluster CRD: {}", e))?;
    Ok(())
}

/// Resolve once SIGINT or SIGTERM arrives
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Run in controller mode
async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    tracing::info!("Pravega controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crd_installed(&client).await?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown requested, interrupting pending waits");
            cancel.cancel();
        });
    }

    let ctx = Arc::new(
        Context::builder(client.clone())
            .config(OperatorConfig {
                disable_finalizer: args.disable_finalizer,
                ..Default::default()
            })
            .cancellation(cancel.clone())
            .build(),
    );

    let (clusters, deployments, stateful_sets): (
        Api<PravegaCluster>,
        Api<Deployment>,
        Api<StatefulSet>,
    ) = match args.watch_namespace.as_deref() {
        Some(ns) => {
            tracing::info!(namespace = %ns, "Watching a single namespace");
            (
                Api::namespaced(client.clone(), ns),
                Api::namespaced(client.clone(), ns),
                Api::namespaced(client.clone(), ns),
            )
        }
        None => (
            Api::all(client.clone()),
            Api::all(client.clone()),
            Api::all(client.clone()),
        ),
    };

    tracing::info!("Starting PravegaCluster controller");
    Controller::new(clusters, WatcherConfig::default())
        .owns(deployments, WatcherConfig::default())
        .owns(stateful_sets, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Cluster reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Cluster reconciliation error");
                }
            }
        })
        .await;

    cancel.cancel();
    tracing::info!("Pravega controller shutting down");
    Ok(())
}

/// Run in webhook mode
async fn run_webhook(args: WebhookArgs) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;
    let app = webhook_router(Arc::new(WebhookState::new(client)));

    match (args.tls_cert, args.tls_key) {
        (Some(cert), Some(key)) => {
            let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to load TLS certificate: {}", e))?;

            let handle = axum_server::Handle::new();
            {
                let handle = handle.clone();
                tokio::spawn(async move {
                    shutdown_signal().await;
                    handle.graceful_shutdown(Some(Duration::from_secs(10)));
                });
            }

            tracing::info!(addr = %args.addr, "Serving admission webhook over TLS");
            axum_server::bind_rustls(args.addr, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .map_err(|e| anyhow::anyhow!("Webhook server failed: {}", e))?;
        }
        _ => {
            let listener = tokio::net::TcpListener::bind(args.addr)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", args.addr, e))?;
            tracing::warn!(addr = %args.addr, "Serving admission webhook without TLS");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .map_err(|e| anyhow::anyhow!("Webhook server failed: {}", e))?;
        }
    }

    tracing::info!("Webhook shutting down");
    Ok(())
}
