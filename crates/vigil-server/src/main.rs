use anyhow::Result;
use chrono::Utc;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use vigil_server::alerting;
use vigil_server::api;
use vigil_server::config::Config;
use vigil_server::ingest::IngestHandler;
use vigil_server::session::SessionManager;
use vigil_server::state::AppState;
use vigil_storage::{MetaStore, Tsdb};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  vigil-server [--config <path>] serve      Start the server (default)");
    eprintln!("  vigil-server [--config <path>] migrate    Apply store schemas and exit");
}

#[tokio::main]
async fn main() -> Result<()> {
    vigil_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("vigil=info".parse()?))
        .init();

    let mut config_path = "config/server.toml".to_string();
    let mut subcommand: Option<String> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config_path = args.next().ok_or_else(|| {
                    print_usage();
                    anyhow::anyhow!("--config requires a path argument")
                })?;
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            cmd if subcommand.is_none() => subcommand = Some(cmd.to_string()),
            other => {
                print_usage();
                anyhow::bail!("unexpected argument: {other}");
            }
        }
    }

    match subcommand.as_deref() {
        None | Some("serve") => run_serve(&config_path).await,
        Some("migrate") => run_migrate(&config_path),
        Some(other) => {
            print_usage();
            anyhow::bail!("unknown subcommand: {other}")
        }
    }
}

/// Open both stores so schemas are created or migrated, then exit.
fn run_migrate(config_path: &str) -> Result<()> {
    let config = Config::load(config_path)?;
    let data_dir = Path::new(&config.data_dir);

    MetaStore::new(data_dir)?;
    Tsdb::new(&data_dir.join("tsdb"))?;

    tracing::info!(data_dir = %config.data_dir, "store schemas up to date");
    Ok(())
}

async fn run_serve(config_path: &str) -> Result<()> {
    let config = Config::load(config_path)?;

    tracing::info!(
        http_port = config.http_port,
        data_dir = %config.data_dir,
        retention_days = config.retention.days,
        "vigil-server starting"
    );

    let data_dir = Path::new(&config.data_dir);
    let meta = Arc::new(MetaStore::new(data_dir)?);
    let tsdb = Arc::new(Tsdb::new(&data_dir.join("tsdb"))?);
    let notifier = Arc::new(vigil_notify::Notifier::new()?);

    let cancel = CancellationToken::new();

    // Observation feed: ingest handler -> evaluator. Status events travel
    // on their own channel so the session manager never blocks on the feed.
    let (feed_tx, feed_rx) = mpsc::channel(config.alert.feed_capacity.max(1));
    let (status_tx, status_rx) = mpsc::channel(256);

    let manager = SessionManager::new(status_tx);
    let supervisor_handle = tokio::spawn(manager.clone().run(cancel.clone()));

    let evaluator_handle = tokio::spawn(alerting::run_evaluator(
        feed_rx,
        status_rx,
        meta.clone(),
        notifier,
        config.alert.tick_secs,
        cancel.clone(),
    ));

    // Hourly retention sweep; the first tick fires immediately so stale
    // partitions from a long downtime are trimmed at startup.
    let retention_tsdb = tsdb.clone();
    let retention_cancel = cancel.clone();
    let horizon_ms = i64::from(config.retention.days) * 24 * 3600 * 1000;
    let retention_handle = tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(3600));
        loop {
            tokio::select! {
                _ = retention_cancel.cancelled() => break,
                _ = tick.tick() => {
                    match retention_tsdb.sweep_expired(horizon_ms, Utc::now()) {
                        Ok(outcome) if outcome.partitions_removed > 0 || outcome.rows_removed > 0 => {
                            tracing::info!(
                                partitions = outcome.partitions_removed,
                                rows = outcome.rows_removed,
                                "retention sweep removed expired samples"
                            );
                        }
                        Err(e) => tracing::error!(error = %e, "retention sweep failed"),
                        _ => {}
                    }
                }
            }
        }
    });

    let ingest = Arc::new(IngestHandler::new(meta.clone(), tsdb.clone(), feed_tx));
    let state = AppState {
        meta,
        tsdb,
        manager,
        ingest,
        config: Arc::new(config.clone()),
        start_time: Utc::now(),
    };

    let addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "listening");

    let app = api::router(state);
    let shutdown_cancel = cancel.clone();
    let serve_result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = shutdown_cancel.cancelled() => {}
        }
        // Cancel before returning so the supervisor closes probe sockets;
        // otherwise graceful shutdown would wait on them forever.
        shutdown_cancel.cancel();
    })
    .await;

    tracing::info!("shutting down");
    cancel.cancel();

    for (name, handle) in [
        ("supervisor", supervisor_handle),
        ("evaluator", evaluator_handle),
        ("retention", retention_handle),
    ] {
        if timeout(SHUTDOWN_GRACE, handle).await.is_err() {
            tracing::warn!(task = name, "task did not stop within grace period");
        }
    }

    serve_result?;
    tracing::info!("server stopped");
    Ok(())
}
