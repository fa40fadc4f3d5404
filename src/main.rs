use clap::Parser;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fund_exchange::adapters::PostgresLedger;
use fund_exchange::cli::{self, Cli, Commands, DbCommands, DlqCommands};
use fund_exchange::config::{Config, LogFormat};
use fund_exchange::events::{EventLog, RedisEventLog};
use fund_exchange::services::{OutboxRelay, SettlementWorker, StreamConsumer, TransactionFinalizer};
use fund_exchange::{create_app, db, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match LogFormat::from_env_or_text() {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    let config = Config::from_env().map_err(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        e
    })?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Settle => settle(config).await,
        Commands::Finalize => finalize(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Dlq(DlqCommands::List { limit }) => cli::handle_dlq_list(&config, limit).await,
        Commands::Dlq(DlqCommands::Requeue { id }) => cli::handle_dlq_requeue(&config, id).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool, Path::new("./migrations")).await?;
    let ledger = Arc::new(PostgresLedger::new(pool));

    let event_log: Arc<dyn EventLog> =
        Arc::new(RedisEventLog::connect(&config.redis_url, &config.consumer).await?);
    tracing::info!(redis_url = %config.redis_url, "Event log connected");

    let relay = OutboxRelay::new(ledger.clone(), event_log.clone(), &config.consumer);
    let relay_task = tokio::spawn(relay.run(shutdown_signal()));

    let app = create_app(AppState::new(ledger.clone(), ledger, event_log));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    relay_task.await?;
    Ok(())
}

async fn settle(config: Config) -> anyhow::Result<()> {
    let ledger = Arc::new(PostgresLedger::new(db::create_pool(&config).await?));

    // Blocking reads hold their connection, so the relay publishes on its own.
    let consumer_log = Arc::new(RedisEventLog::connect(&config.redis_url, &config.consumer).await?);
    let relay_log = Arc::new(RedisEventLog::connect(&config.redis_url, &config.consumer).await?);

    let relay = OutboxRelay::new(ledger.clone(), relay_log, &config.consumer);
    let relay_task = tokio::spawn(relay.run(shutdown_signal()));

    let worker = SettlementWorker::new(ledger.clone(), config.settlement_notes.clone());
    StreamConsumer::new(consumer_log, ledger, worker, &config.consumer)
        .run(shutdown_signal())
        .await;

    relay_task.await?;
    Ok(())
}

async fn finalize(config: Config) -> anyhow::Result<()> {
    let ledger = Arc::new(PostgresLedger::new(db::create_pool(&config).await?));
    let event_log = Arc::new(RedisEventLog::connect(&config.redis_url, &config.consumer).await?);

    let finalizer = TransactionFinalizer::new(ledger.clone());
    StreamConsumer::new(event_log, ledger, finalizer, &config.consumer)
        .run(shutdown_signal())
        .await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
