//! nst-init - deploy container apps onto a shared Kubernetes namespace

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use kube::Client;
use serde::Serialize;
use tracing::{info, warn};

use nst_init::api::{self, ApiState, DEFAULT_OWNER_HEADER};
use nst_init::config::{
    Config, DEFAULT_INGRESS_CLASS, DEFAULT_NAMESPACE, DEFAULT_SCHEME, DEFAULT_ZONE,
};
use nst_init::control_plane::KubeControlPlane;
use nst_init::lifecycle::{DeployRequest, Lifecycle};
use nst_init::{telemetry, DEFAULT_HTTP_PORT};

/// nst-init - deploy container apps as Deployment + Service + Ingress
#[derive(Parser, Debug)]
#[command(name = "nst-init", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Where apps are deployed and how they are published
#[derive(Args, Debug)]
struct Settings {
    /// Namespace every app is deployed into
    #[arg(long, env = "K8S_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// DNS zone apps are published under
    #[arg(long, env = "APP_ZONE", default_value = DEFAULT_ZONE)]
    zone: String,

    /// Scheme used in app URLs (http or https)
    #[arg(long, env = "APP_SCHEME", default_value = DEFAULT_SCHEME)]
    scheme: String,

    /// Ingress class for app routes; empty uses the cluster default
    #[arg(long, env = "INGRESS_CLASS", default_value = DEFAULT_INGRESS_CLASS)]
    ingress_class: String,

    /// Port the HTTP server listens on
    #[arg(long, env = "PORT", default_value_t = DEFAULT_HTTP_PORT)]
    port: u16,

    /// Header carrying the authenticated caller
    #[arg(long, env = "OWNER_HEADER", default_value = DEFAULT_OWNER_HEADER)]
    owner_header: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP API (default mode)
    Serve,

    /// Deploy or redeploy one app and print where it is reachable
    Deploy(DeployArgs),

    /// Print every managed app, newest first
    List,

    /// Remove an app owned by `--owner`
    Remove(RemoveArgs),
}

#[derive(Args, Debug)]
struct DeployArgs {
    /// Identity that owns the app
    #[arg(long)]
    owner: String,

    /// App name
    #[arg(long)]
    app_name: String,

    /// Container image
    #[arg(long)]
    image: String,

    /// Port the container listens on (default 8080)
    #[arg(long, allow_negative_numbers = true)]
    port: Option<i64>,
}

#[derive(Args, Debug)]
struct RemoveArgs {
    /// Internal name of the app
    name: String,

    /// Identity removing the app
    #[arg(long)]
    owner: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    telemetry::init(cli.log_json)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let settings = cli.settings;
    let config = Config::new(
        &settings.namespace,
        &settings.zone,
        &settings.scheme,
        Some(settings.ingress_class.as_str()),
    )?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;
    let control_plane = Arc::new(KubeControlPlane::new(client, config.namespace.clone()));
    let lifecycle = Lifecycle::new(control_plane, config);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server(lifecycle, settings.port, settings.owner_header).await,
        Commands::Deploy(args) => {
            let request = DeployRequest {
                owner: args.owner,
                app_name: args.app_name,
                image: args.image,
                port: args.port,
            };
            print_json(&lifecycle.deploy(&request).await?)
        }
        Commands::List => print_json(&lifecycle.list().await?),
        Commands::Remove(args) => {
            let report = lifecycle.remove(&args.name, &args.owner).await?;
            let deleted: Vec<String> = report.deleted.iter().map(ToString::to_string).collect();
            print_json(&serde_json::json!({ "ok": true, "deleted": deleted }))
        }
    }
}

/// Serve the HTTP API until interrupted
async fn run_server(lifecycle: Lifecycle, port: u16, owner_header: String) -> anyhow::Result<()> {
    let health = lifecycle.health();
    let state = Arc::new(ApiState::new(lifecycle, owner_header));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;
    info!(%addr, namespace = %health.ns, zone = %health.zone, "nst-init listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => {
            warn!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
