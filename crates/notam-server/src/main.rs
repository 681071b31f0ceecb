//! NOTAM Server - main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use notam_common::logging::{init_logging, LogConfig};
use std::{future::IntoFuture, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::{signal, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use notam_server::{
    api::{self, AppState},
    broker::{self, BrokerSession, PgQueueSession},
    config::{Config, RetentionConfig},
    db::{self, tokens, NoticeStore, PgNoticeStore},
    ingest::{IngestFault, IngestStats, IngestionCoordinator, RetentionTask, FAULT_CHANNEL_CAPACITY},
    resilience::ResilienceGuard,
    ServerError,
};

#[derive(Parser, Debug)]
#[command(name = "notam-server")]
#[command(author, version, about = "NOTAM ingestion service and read API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run migrations, ingestion, retention and the API (default)
    Serve,

    /// Apply database migrations and exit
    Migrate,

    /// Delete notices that expired more than the retention window ago
    Prune {
        /// Retention window in days (defaults to RETENTION_DAYS)
        #[arg(long)]
        days: Option<i32>,
    },

    /// Publish a payload file to the inbound queue
    Enqueue {
        file: PathBuf,

        /// Queue name (defaults to BROKER_QUEUE)
        #[arg(long)]
        queue: Option<String>,
    },

    /// Register an API access token
    Token {
        /// Human-readable token name
        name: String,

        /// Token value; generated when omitted
        #[arg(long)]
        value: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .log_file_prefix("notam-server")
        .filter_directives("notam_server=debug,notam_ingest=info,tower_http=debug,sqlx=warn")
        .build()
        .merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    let config = Config::load()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Migrate => {
            let pool = db::create_pool(&config.database).await?;
            notam_server::migrate(&pool).await?;
            info!("Database migrations completed");
            Ok(())
        },
        Command::Prune { days } => prune(config, days).await,
        Command::Enqueue { file, queue } => {
            let payload =
                std::fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;
            let queue = queue.unwrap_or(config.broker.queue);
            let pool = db::create_pool(&config.database).await?;
            let id = broker::enqueue(&pool, &queue, &payload).await?;
            info!(id, queue = %queue, "Message enqueued");
            Ok(())
        },
        Command::Token { name, value } => {
            let value = value.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
            let pool = db::create_pool(&config.database).await?;
            let token = tokens::create(&pool, &name, &value).await?;
            info!(token_id = %token.id, name = %token.name, "Access token created");
            println!("{value}");
            Ok(())
        },
    }
}

async fn serve(config: Config) -> Result<()> {
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let pool = db::create_pool(&config.database).await?;
    info!("Database connection pool established");

    notam_server::migrate(&pool).await?;
    info!("Database migrations completed");

    let store: Arc<dyn NoticeStore> = Arc::new(PgNoticeStore::new(pool.clone()));
    let guard = Arc::new(ResilienceGuard::new(
        config.resilience.breaker(),
        config.resilience.retry(),
    ));
    let stats = Arc::new(IngestStats::new());

    let (fault_tx, fault_rx) = mpsc::channel(FAULT_CHANNEL_CAPACITY);
    let fault_drain = tokio::spawn(drain_faults(fault_rx));

    let session: Arc<dyn BrokerSession> = if config.broker.url == config.database.url {
        Arc::new(PgQueueSession::from_pool(pool.clone(), config.broker.clone()))
    } else {
        Arc::new(PgQueueSession::new(config.broker.clone()))
    };

    let coordinator = IngestionCoordinator::new(
        session,
        Arc::clone(&store),
        Arc::clone(&guard),
        config.broker.queue.clone(),
    )
    .with_stats(Arc::clone(&stats))
    .with_fault_channel(fault_tx);
    let coordinator_state = coordinator.watch_state();

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let ingestion = tokio::spawn({
        let shutdown = shutdown.child_token();
        async move { coordinator.run(shutdown).await }
    });

    let retention = if config.retention.enabled {
        let task = RetentionTask::new(Arc::clone(&store), Arc::clone(&guard), &config.retention);
        Some(task.start(shutdown.child_token()))
    } else {
        info!("Retention pruning is disabled (RETENTION_ENABLED=false)");
        None
    };

    let state = AppState {
        pool: pool.clone(),
        store,
        stats,
        guard,
        coordinator: Some(coordinator_state),
    };
    let app = api::create_router(state, &config.cors);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| ServerError::Config(format!("invalid listen address: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(ServerError::Io)?;
    info!("Server listening on {}", addr);

    let api_shutdown = CancellationToken::new();
    let server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(api_shutdown.clone().cancelled_owned())
            .into_future(),
    );

    // Ingestion ends on a signal or when the broker gives up. Either way it
    // has released its session before the API and the pool go away.
    let ingestion_result = ingestion.await;
    shutdown.cancel();

    if let Some(retention) = retention {
        if let Err(e) = retention.await {
            warn!("Retention task ended abnormally: {}", e);
        }
    }

    api_shutdown.cancel();
    let timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    match tokio::time::timeout(timeout, server).await {
        Ok(Ok(Ok(()))) => info!("API server stopped"),
        Ok(Ok(Err(e))) => error!("API server error: {}", e),
        Ok(Err(e)) => error!("API server task failed: {}", e),
        Err(_) => warn!("API server did not stop within {}s", timeout.as_secs()),
    }

    pool.close().await;
    info!("Database pool closed");

    if let Err(e) = fault_drain.await {
        warn!("Fault drain task failed: {}", e);
    }

    match ingestion_result {
        Ok(Ok(())) => {
            info!("Server shut down gracefully");
            Ok(())
        },
        Ok(Err(e)) => Err(ServerError::Broker(e).into()),
        Err(e) => Err(anyhow::anyhow!("Ingestion task failed: {}", e)),
    }
}

async fn prune(config: Config, days: Option<i32>) -> Result<()> {
    let pool = db::create_pool(&config.database).await?;
    let store: Arc<dyn NoticeStore> = Arc::new(PgNoticeStore::new(pool.clone()));
    let guard = Arc::new(ResilienceGuard::new(
        config.resilience.breaker(),
        config.resilience.retry(),
    ));
    let retention = RetentionConfig {
        days: days.unwrap_or(config.retention.days),
        ..config.retention
    };
    if retention.days < 0 {
        anyhow::bail!("Retention days cannot be negative");
    }

    let deleted = RetentionTask::new(store, guard, &retention).run_once().await?;
    info!(deleted, retention_days = retention.days, "Pruned expired notices");

    pool.close().await;
    Ok(())
}

async fn drain_faults(mut faults: mpsc::Receiver<IngestFault>) {
    while let Some(fault) = faults.recv().await {
        error!(fault = %fault, "Ingestion fault");
    }
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
