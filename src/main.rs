//! CSM Operator
//!
//! Watches `ContainerStorageModule` resources and installs the CSI drivers
//! and modules they describe.

use anyhow::Context as _;
use clap::Parser;
use hyper::{Body, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use csm_operator::controller::{self, Context};
use csm_operator::{KubeClusterClient, Metrics, OperatorConfig, DEFAULT_CONFIG_DIR};

// =============================================================================
// CLI Arguments
// =============================================================================

/// CSM Operator - installs Container Storage Modules on Kubernetes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Root of the driver and module config tree
    #[arg(long, env = "CONFIG_DIR", default_value = DEFAULT_CONFIG_DIR)]
    config_dir: String,

    /// Kubernetes version used to pick sidecar images, e.g. v1.29.
    /// Detected from the API server when unset.
    #[arg(long, env = "K8S_VERSION")]
    k8s_version: Option<String>,

    /// Only watch this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting CSM Operator");
    info!("  Version: {}", csm_operator::VERSION);
    info!("  Config dir: {}", args.config_dir);
    info!("  Namespace: {}", args.namespace.as_deref().unwrap_or("<all>"));

    let kube = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let k8s_version = match args.k8s_version.clone() {
        Some(v) => v,
        None => detect_k8s_version(&kube).await?,
    };
    info!("  Kubernetes: {}", k8s_version);

    let config = OperatorConfig::load(&args.config_dir, &k8s_version)
        .context("failed to load operator config")?;
    let metrics = Metrics::new().context("failed to register metrics")?;

    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {:#}", e);
        }
    });

    let metrics_addr = args.metrics_addr.clone();
    let exported = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, exported).await {
            error!("Metrics server error: {:#}", e);
        }
    });

    let client = Arc::new(KubeClusterClient::new(kube.clone()));
    let ctx = Context::new(client, config, metrics);
    controller::run(kube, ctx, args.namespace).await;

    info!("Operator shutdown complete");
    Ok(())
}

/// `v<major>.<minor>` of the API server, ignoring provider suffixes like `29+`
async fn detect_k8s_version(kube: &kube::Client) -> anyhow::Result<String> {
    let info = kube
        .apiserver_version()
        .await
        .context("failed to query API server version")?;
    let minor: String = info.minor.chars().take_while(char::is_ascii_digit).collect();
    Ok(format!("v{}.{}", info.major, minor))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("kube=info".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

fn respond(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str) -> anyhow::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Request, Server};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => respond(StatusCode::OK, "ok"),
                _ => respond(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().context("invalid health server address")?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, metrics: Metrics) -> anyhow::Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Request, Server};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match metrics.encode() {
                            Ok((content_type, buffer)) => {
                                let mut response = respond(StatusCode::OK, buffer);
                                if let Ok(value) = HeaderValue::from_str(&content_type) {
                                    response.headers_mut().insert(CONTENT_TYPE, value);
                                }
                                response
                            }
                            Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                        },
                        _ => respond(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().context("invalid metrics server address")?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}
