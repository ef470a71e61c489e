use event_bus::consumer_retry::RetryConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use comments_rs::{
    auth::HttpIdentityVerifier,
    broker_setup::{comments_topology, connect_bus, ensure_topology, ConnectedBus},
    config::Config,
    consumer::CommentConsumer,
    db,
    events::{CommentEventPublisher, PublishLimiter},
    metrics::Metrics,
    repos::{CommentStore, PgCommentStore},
    routes::{app, AppState},
    start_comment_consumers,
};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,comments_rs=debug".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopCause {
    Signal,
    WorkersStopped,
}

/// Waits for all consumer workers; the receiver fires if they all return
/// before shutdown was requested
fn supervise(workers: Vec<JoinHandle<()>>) -> (JoinHandle<()>, Option<oneshot::Receiver<()>>) {
    if workers.is_empty() {
        return (tokio::spawn(async {}), None);
    }

    let (stopped_tx, stopped_rx) = oneshot::channel();
    let supervisor = tokio::spawn(async move {
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Consumer worker panicked");
            }
        }
        let _ = stopped_tx.send(());
    });
    (supervisor, Some(stopped_rx))
}

async fn stop_signal(workers_stopped: Option<oneshot::Receiver<()>>) -> StopCause {
    let workers = async {
        if let Some(stopped) = workers_stopped {
            if stopped.await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await
    };

    tokio::select! {
        _ = shutdown_signal() => StopCause::Signal,
        _ = workers => {
            tracing::error!("All comment consumer workers stopped; shutting down");
            StopCause::WorkersStopped
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("Starting comments service...");

    let config = Config::from_env()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        bus_type = %config.bus_type,
        role = ?config.role,
        "Configuration loaded"
    );

    let metrics = Metrics::new();
    let startup_retry = RetryConfig::fixed(
        config.startup_retry_attempts,
        Duration::from_millis(config.startup_retry_delay_ms),
    );

    // Database + migrations
    tracing::info!("Connecting to database...");
    let pool = db::connect_with_retry(&config.database_url, &startup_retry).await?;
    db::run_migrations(&pool).await?;
    metrics.set_dep_up("db", true);
    let store: Arc<dyn CommentStore> = Arc::new(PgCommentStore::new(pool));

    // Broker + topology
    let ConnectedBus { bus, nats } =
        connect_bus(&config.bus_type, &config.nats_url, &startup_retry).await?;
    ensure_topology(
        bus.as_ref(),
        &comments_topology(&config.exchange, &config.queue),
        &startup_retry,
    )
    .await?;
    metrics.set_dep_up("broker", true);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let workers = if config.role.runs_consumer() {
        let consumer = CommentConsumer::new(
            bus.clone(),
            store.clone(),
            config.exchange.clone(),
            config.queue.clone(),
            config.consumer_settings(),
            metrics.clone(),
        );
        tracing::info!(workers = config.consumer_workers, "Starting comment consumers");
        start_comment_consumers(consumer, config.consumer_workers, shutdown_rx)
    } else {
        Vec::new()
    };
    let consumer_workers = workers.len();
    let (supervisor, workers_stopped) = supervise(workers);

    let cause = if config.role.runs_api() {
        let verifier = HttpIdentityVerifier::new(
            &config.auth_service_url,
            Duration::from_millis(config.auth_timeout_ms),
        )?;
        let publisher = CommentEventPublisher::new(
            bus.clone(),
            config.exchange.clone(),
            PublishLimiter::new(
                config.max_inflight_publishes,
                config.publish_acquire_timeout_ms,
            ),
            metrics.clone(),
        );

        let state = AppState {
            publisher,
            store,
            verifier: Arc::new(verifier),
            metrics,
            nats,
            consumer_workers,
        };

        let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "Comments API listening");

        let (cause_tx, cause_rx) = oneshot::channel();
        axum::serve(listener, app(state))
            .with_graceful_shutdown(async move {
                let _ = cause_tx.send(stop_signal(workers_stopped).await);
            })
            .await?;
        cause_rx.await.unwrap_or(StopCause::Signal)
    } else {
        stop_signal(workers_stopped).await
    };

    // Stop pulling new deliveries and wait for in-flight ones to settle
    let _ = shutdown_tx.send(true);
    if let Err(e) = supervisor.await {
        tracing::error!(error = %e, "Consumer supervisor panicked");
    }

    if cause == StopCause::WorkersStopped {
        return Err("all comment consumer workers stopped".into());
    }

    tracing::info!("Comments service stopped");
    Ok(())
}
