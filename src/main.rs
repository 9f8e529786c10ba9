//! Silo operator - reconciles Bucket CRDs against AWS S3

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use silo::controller::{error_policy, reconcile, Context, NonEmptyBucketPolicy};
use silo::crd::Bucket;

/// Silo - Kubernetes operator for declarative S3 bucket management
#[derive(Parser, Debug)]
#[command(name = "silo", version, about, long_about = None)]
struct Cli {
    /// Generate the CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches Bucket resources across all namespaces and reconciles the
    /// corresponding S3 buckets. The CRD is installed on startup via
    /// server-side apply, so CRD versions always match the operator version.
    Controller(ControllerArgs),
}

/// Controller mode arguments
#[derive(Parser, Debug, Default)]
struct ControllerArgs {
    /// AWS region for bucket operations
    ///
    /// When unset, the region resolves through the standard AWS chain
    /// (environment, profile, IMDS).
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    /// Empty non-empty buckets before deleting them
    ///
    /// Without this flag, deleting a Bucket whose S3 bucket still contains
    /// objects fails and retries until the objects are gone.
    #[arg(long)]
    force_delete_non_empty: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        // Generate CRD YAML
        let crd = serde_yaml::to_string(&Bucket::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    match cli.command {
        Some(Commands::Controller(args)) => run_controller(args).await,
        None => {
            run_controller(ControllerArgs {
                region: std::env::var("AWS_REGION").ok(),
                ..Default::default()
            })
            .await
        }
    }
}

/// Ensure the Bucket CRD is installed
///
/// The operator installs its own CRD on startup using server-side apply.
/// This ensures the CRD version always matches the operator version.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply("silo-controller").force();

    tracing::info!("Installing Bucket CRD...");
    crds.patch("buckets.silo.dev", &params, &Patch::Apply(&Bucket::crd()))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to install Bucket CRD: {}", e))?;

    tracing::info!("Bucket CRD installed/updated");
    Ok(())
}

/// Run in controller mode - watches Bucket CRDs and reconciles S3
async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    tracing::info!("Silo controller starting...");

    // Create Kubernetes client
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    // Operator installs its own CRD on startup
    ensure_crd_installed(&client).await?;

    let policy = if args.force_delete_non_empty {
        tracing::info!("Non-empty buckets will be emptied before deletion");
        NonEmptyBucketPolicy::ForceDelete
    } else {
        NonEmptyBucketPolicy::Fail
    };

    let mut ctx_builder = Context::builder(client.clone()).non_empty_policy(policy);
    if let Some(ref region) = args.region {
        tracing::info!(region = %region, "Using configured AWS region");
        ctx_builder = ctx_builder.region(region.clone());
    }
    let ctx = Arc::new(ctx_builder.build());

    let buckets: Api<Bucket> = Api::all(client);

    tracing::info!("Starting Bucket controller");

    // Watch all object events, not just generation changes: finalizer and
    // status writes must retrigger reconciliation to drive the next
    // state-machine step
    Controller::new(buckets, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Bucket reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Bucket reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("Silo controller shutting down");
    Ok(())
}
