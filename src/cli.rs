use clap::{Parser, Subcommand};
use std::path::Path;
use uuid::Uuid;

use crate::adapters::PostgresLedger;
use crate::config::Config;
use crate::ports::DeadLetterStore;

#[derive(Parser)]
#[command(name = "fund-exchange")]
#[command(about = "Fund Exchange - choreographed transfers between sub-accounts", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP intake server and outbox relay (default)
    Serve,

    /// Run the settlement worker on the exchange_orders stream
    Settle,

    /// Run the finalizer on the transactions stream
    Finalize,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Dead-letter queue commands
    #[command(subcommand)]
    Dlq(DlqCommands),
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum DlqCommands {
    /// List dead-lettered messages, newest first
    List {
        #[arg(short, long, default_value_t = 50)]
        limit: i64,
    },

    /// Put a dead-lettered message back on its stream
    Requeue {
        #[arg(value_name = "DLQ_ID")]
        id: Uuid,
    },
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool, Path::new("./migrations")).await?;

    println!("✓ Database migrations completed");
    Ok(())
}

pub async fn handle_dlq_list(config: &Config, limit: i64) -> anyhow::Result<()> {
    let ledger = PostgresLedger::new(crate::db::create_pool(config).await?);
    let entries = ledger.list_dead_letters(limit).await?;

    if entries.is_empty() {
        println!("Dead-letter queue is empty");
        return Ok(());
    }

    println!("{:<38} {:<16} {:<9} {:<20} {}", "ID", "Topic", "Attempts", "Moved", "Reason");
    println!("{}", "-".repeat(110));
    for entry in entries {
        println!(
            "{:<38} {:<16} {:<9} {:<20} {}",
            entry.id,
            entry.topic,
            entry.attempts,
            entry.moved_to_dlq_at.format("%Y-%m-%d %H:%M:%S"),
            entry.error_reason
        );
    }

    Ok(())
}

pub async fn handle_dlq_requeue(config: &Config, id: Uuid) -> anyhow::Result<()> {
    let ledger = PostgresLedger::new(crate::db::create_pool(config).await?);

    if ledger.requeue(id).await? {
        tracing::info!(dlq_id = %id, "DLQ entry requeued");
        println!("✓ DLQ entry {} requeued", id);
        Ok(())
    } else {
        tracing::warn!(dlq_id = %id, "DLQ entry not found");
        anyhow::bail!("DLQ entry {} not found", id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["fund-exchange"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn dlq_requeue_takes_a_uuid() {
        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from(["fund-exchange", "dlq", "requeue", &id.to_string()]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Dlq(DlqCommands::Requeue { id: parsed })) if parsed == id));

        assert!(Cli::try_parse_from(["fund-exchange", "dlq", "requeue", "not-a-uuid"]).is_err());
    }

    #[test]
    fn help_is_answered_by_the_parser() {
        let err = Cli::try_parse_from(["fund-exchange", "--help"]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }
}
