//! c8s-operator: the Kubernetes controller binary. Watches `PipelineRun`
//! resources, reconciles them against `PipelineConfig` templates, and
//! serves a liveness/readiness surface for the kubelet.

mod cli;
mod health;

use std::net::SocketAddr;
use std::sync::Arc;

use c8s_controller::{error_policy, reconcile, Context, LogBufferManager};
use c8s_k8s::crd::PipelineRun;
use c8s_storage::S3ObjectStore;
use clap::Parser;
use futures::StreamExt;
use kube::runtime::controller::Controller;
use kube::{Api, Client};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let cli = cli::Cli::parse();

    info!("connecting to cluster API");
    let client = Client::try_default().await?;

    let store = Arc::new(S3ObjectStore::new(
        cli.object_store_endpoint.clone(),
        cli.object_store_bucket.clone(),
        cli.object_store_access_key.clone(),
        cli.object_store_secret_key.clone(),
    ));
    let buffers = LogBufferManager::new(cli.log_buffer_cap_bytes);

    let mut ctx = Context::new(client.clone(), store, buffers);
    ctx.requeue_after = std::time::Duration::from_secs(cli.requeue_seconds);
    let ctx = Arc::new(ctx);

    let runs: Api<PipelineRun> = match &cli.namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    let controller = Controller::new(runs, Default::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((run_ref, action)) => info!(?run_ref, ?action, "reconciled"),
                Err(e) => warn!(error = %e, "reconcile failed"),
            }
        });

    let app = health::router().layer(TraceLayer::new_for_http());
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.health_port));
    info!(%addr, "starting health server");

    let server = async {
        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok::<_, anyhow::Error>(())
    };

    tokio::select! {
        _ = controller => {
            error!("controller loop exited");
        }
        res = server => {
            if let Err(e) = res {
                error!(error = %e, "health server exited");
            }
        }
    }

    Ok(())
}
