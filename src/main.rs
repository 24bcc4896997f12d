use std::future::ready;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bridge_relay::clients::{ExecutorClient, GraphQlEventSource, HttpCatchUp};
use bridge_relay::config::{Config, MonitorKind, CONFIG_FILE_NAME};
use bridge_relay::metrics::{api_metrics, describe_metrics};
use bridge_relay::monitor::{Monitor, PullMonitor, PushMonitor};
use bridge_relay::observability::{init_logging, LoggingConfig};
use bridge_relay::observer::ExchangeObserver;
use bridge_relay::relay::Relay;
use bridge_relay::router::relay_router;
use bridge_relay::state::AppState;
use bridge_relay::store::{FileStateStore, StateStore};
use bridge_relay::webhooks::{NoopSink, NotificationSink, WebhookNotifier};
use clap::Parser;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Parser)]
#[clap(version, about = "Relays confirmed source-chain deposits to the destination chain")]
struct Cli {
    /// Data directory path (contains config, state and logs)
    #[clap(long, env = "BRIDGE_RELAY_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Server address (overrides config)
    #[clap(long, env = "BRIDGE_RELAY_ADDR")]
    addr: Option<String>,

    /// Monitor strategy: pull, push (overrides config)
    #[clap(long, env = "BRIDGE_RELAY_MONITOR")]
    monitor: Option<String>,

    /// Address whose incoming transfers are exchanged (overrides config)
    #[clap(long, env = "BRIDGE_RELAY_WATCHED_ADDRESS")]
    watched_address: Option<String>,

    /// Required confirmations in pull mode (overrides config)
    #[clap(long, env = "BRIDGE_RELAY_CONFIRMATIONS")]
    confirmations: Option<u64>,

    /// GraphQL endpoint of the source chain node (overrides config)
    #[clap(long, env = "BRIDGE_RELAY_GRAPHQL_ENDPOINT")]
    graphql_endpoint: Option<String>,

    /// Catch-up endpoint of the webhook indexer (overrides config)
    #[clap(long, env = "BRIDGE_RELAY_CATCH_UP_ENDPOINT")]
    catch_up_endpoint: Option<String>,

    /// Shared secret of incoming webhooks (overrides config)
    #[clap(long, env = "BRIDGE_RELAY_WEBHOOK_SECRET")]
    webhook_secret: Option<String>,

    /// Base URL of the signing service (overrides config)
    #[clap(long, env = "BRIDGE_RELAY_EXECUTOR_ENDPOINT")]
    executor_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli: Cli = Cli::parse();

    let log_config = LoggingConfig {
        level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        log_dir: cli.data_dir.join("logs"),
        console_output: std::env::var("NO_CONSOLE_LOG").is_err(),
        file_output: std::env::var("NO_FILE_LOG").is_err(),
        ..Default::default()
    };
    init_logging(log_config)?;

    std::fs::create_dir_all(&cli.data_dir)?;

    let config_path = cli.data_dir.join(CONFIG_FILE_NAME);
    let (mut config, created) = Config::load_or_create(&config_path)?;
    if created {
        warn!(path = %config_path.display(), "Wrote default configuration, edit it before relaying");
    }

    apply_overrides(&mut config, cli)?;
    config.validate().context("invalid configuration")?;

    let metrics_handle = init_prometheus_metrics()?;

    let store = Arc::new(FileStateStore::new(config.state_path()));
    let cursor = match store.load(&config.monitor.key).await? {
        Some(cursor) => Some(cursor),
        None => config.monitor.initial_cursor.clone(),
    };

    info!(
        monitor = %config.monitor.kind,
        key = %config.monitor.key,
        cursor = ?cursor,
        state_path = %store.path().display(),
        "Starting bridge relay"
    );

    let executor_endpoint = config
        .executor
        .endpoint
        .clone()
        .context("executor.endpoint is required")?;
    let executor = Arc::new(ExecutorClient::new(executor_endpoint)?);

    let notifier: Arc<dyn NotificationSink> =
        if config.notifications.enabled && !config.notifications.endpoints.is_empty() {
            Arc::new(WebhookNotifier::new(config.notifications.webhook_config())?)
        } else {
            info!("No notification endpoints configured, notifications are disabled");
            Arc::new(NoopSink)
        };

    let observer = ExchangeObserver::new(
        executor.clone(),
        executor,
        store.clone(),
        notifier,
        config.observer_config(),
    );
    let relay = Relay::new(observer);
    let state = AppState::new(config.monitor.kind, config.monitor.key.clone(), store);

    match config.monitor.kind {
        MonitorKind::Pull => {
            let Some(cursor) = cursor else {
                bail!(
                    "pull monitor needs a starting point: set monitor.initial-cursor in {}",
                    config_path.display()
                );
            };
            let endpoint = config
                .source
                .graphql_endpoint
                .clone()
                .context("source.graphql-endpoint is required")?;
            let source = Arc::new(GraphQlEventSource::new(endpoint)?);
            let monitor = PullMonitor::new(
                source,
                cursor,
                config.monitor.watched_address.clone(),
                config.pull_config(),
            );
            serve_and_relay(&config, state, monitor, relay, metrics_handle).await
        }
        MonitorKind::Push => {
            let endpoint = config
                .source
                .catch_up_endpoint
                .clone()
                .context("source.catch-up-endpoint is required")?;
            let catch_up = Arc::new(HttpCatchUp::new(endpoint)?);
            let monitor = PushMonitor::new(
                config.monitor.watched_address.clone(),
                cursor,
                catch_up,
                config.push_config(),
            );
            let state = state.with_ingress(monitor.ingress(), config.source.webhook_secret.clone());
            serve_and_relay(&config, state, monitor, relay, metrics_handle).await
        }
    }
}

fn apply_overrides(config: &mut Config, cli: Cli) -> Result<()> {
    config.data_dir = Some(cli.data_dir);

    if let Some(addr) = cli.addr {
        let Some((ip, port)) = addr.rsplit_once(':') else {
            bail!("invalid address {addr}, expected ip:port");
        };
        config.http_bind_ip = ip.to_string();
        config.http_bind_port = port
            .parse()
            .with_context(|| format!("invalid port in {addr}"))?;
    }
    if let Some(kind) = cli.monitor {
        config.monitor.kind = MonitorKind::from_str(&kind)?;
    }
    if let Some(watched_address) = cli.watched_address {
        config.monitor.watched_address = watched_address;
    }
    if let Some(confirmations) = cli.confirmations {
        config.monitor.confirmations = confirmations;
    }
    if let Some(endpoint) = cli.graphql_endpoint {
        config.source.graphql_endpoint = Some(endpoint);
    }
    if let Some(endpoint) = cli.catch_up_endpoint {
        config.source.catch_up_endpoint = Some(endpoint);
    }
    if let Some(secret) = cli.webhook_secret {
        config.source.webhook_secret = Some(secret);
    }
    if let Some(endpoint) = cli.executor_endpoint {
        config.executor.endpoint = Some(endpoint);
    }
    Ok(())
}

/// Serve the HTTP surface and drive the relay until shutdown or a fatal
/// error, whichever comes first
async fn serve_and_relay<M: Monitor>(
    config: &Config,
    state: AppState,
    monitor: M,
    relay: Relay,
    metrics_handle: PrometheusHandle,
) -> Result<()> {
    let (shutdown_tx, _) = broadcast::channel(1);

    let app: Router = relay_router(state, &config.source.webhook_path)
        .route("/metrics", get(move || ready(metrics_handle.render())))
        .layer(TraceLayer::new_for_http())
        .route_layer(middleware::from_fn(track_metrics));

    let addr = config.http_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("bridge-relay listening on {addr}");

    let mut server_shutdown = shutdown_tx.subscribe();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.recv().await;
            })
            .await
    });

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
            let _ = signal_tx.send(());
        }
    });

    let result = relay.run(monitor, shutdown_tx.subscribe()).await;
    let _ = shutdown_tx.send(());

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
        Err(e) => error!(error = %e, "HTTP server task panicked"),
    }

    let stats = result?;
    info!(
        batches = stats.batches,
        minted = stats.minted,
        refunded = stats.refunded,
        failed = stats.failed,
        "Relay stopped"
    );
    Ok(())
}

fn init_prometheus_metrics() -> Result<PrometheusHandle> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            EXPONENTIAL_SECONDS,
        )?
        .install_recorder()?;

    describe_metrics();
    Ok(handle)
}

async fn track_metrics(req: Request, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };
    let method = req.method().clone();

    let response = next.run(req).await;

    api_metrics::record_api_request(
        method.as_str(),
        &path,
        response.status().as_u16(),
        start.elapsed(),
    );

    response
}
