//! blockcrawl CLI: inspect and reset crawl cursors.
//!
//! Usage:
//! ```bash
//! blockcrawl status --db ./crawl.db
//! blockcrawl status --db ./crawl.db --stream ethereum:usdc-transfers
//! blockcrawl reset  --db ./crawl.db --stream ethereum:usdc-transfers
//! blockcrawl info
//! ```

use anyhow::{Context, Result};
use blockcrawl_core::telemetry::{init_tracing, LogConfig};
use blockcrawl_core::{Checkpoint, CrawlConfig, ProgressStore};
use blockcrawl_storage::SqliteProgressStore;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "blockcrawl",
    about = "Ordered, checkpointed log crawler for range-limited chain nodes",
    version
)]
struct Cli {
    /// Log filter, e.g. `debug` or `blockcrawl_storage=trace`
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, PartialEq, Subcommand)]
enum Command {
    /// Show saved cursors
    Status {
        /// Path to the SQLite cursor database
        #[arg(long)]
        db: String,
        /// Only show this stream
        #[arg(long)]
        stream: Option<String>,
    },

    /// Delete a stream's cursor so the next crawl starts from its start block
    Reset {
        /// Path to the SQLite cursor database
        #[arg(long)]
        db: String,
        /// Stream key to reset
        #[arg(long)]
        stream: String,
    },

    /// Show default crawl configuration
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&LogConfig {
        level: cli.log_level.clone(),
        ..LogConfig::default()
    });

    match cli.command {
        Command::Status { db, stream } => cmd_status(&db, stream.as_deref()).await,
        Command::Reset { db, stream } => cmd_reset(&db, &stream).await,
        Command::Info => {
            cmd_info();
            Ok(())
        }
    }
}

fn cmd_info() {
    let defaults = CrawlConfig::default();
    println!("BlockCrawl v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default max span: {} blocks/fetch", defaults.max_span);
    println!("  Default narrowing retries: {}", defaults.max_retries);
    println!("  Default confirmations: {} blocks", defaults.confirmations);
    println!("  Default poll interval: {} ms", defaults.poll_interval_ms);
    println!("  Default error backoff: {} ms", defaults.error_backoff_ms);
    println!("  Default handler error policy: {:?}", defaults.handler_error_policy);
    println!("  Cursor stores: memory, SQLite, Postgres (feature: postgres)");
}

async fn cmd_status(db: &str, stream: Option<&str>) -> Result<()> {
    let store = SqliteProgressStore::open(db)
        .await
        .with_context(|| format!("opening {db}"))?;

    let checkpoints = match stream {
        Some(stream) => store.load(stream).await?.into_iter().collect(),
        None => store.list().await?,
    };

    if checkpoints.is_empty() {
        match stream {
            Some(stream) => println!("{stream}: no cursor (crawl starts at its start block)"),
            None => println!("No cursors saved in {db}"),
        }
        return Ok(());
    }
    for cp in &checkpoints {
        println!("{}", describe(cp));
    }
    Ok(())
}

fn describe(cp: &Checkpoint) -> String {
    let updated = chrono::DateTime::from_timestamp(cp.updated_at, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| cp.updated_at.to_string());
    format!(
        "{}: block {} (resumes at {}), updated {}",
        cp.stream,
        cp.block_number,
        cp.block_number.saturating_add(1),
        updated
    )
}

async fn cmd_reset(db: &str, stream: &str) -> Result<()> {
    let store = SqliteProgressStore::open(db)
        .await
        .with_context(|| format!("opening {db}"))?;
    match store.load(stream).await? {
        Some(cp) => {
            store.delete(stream).await?;
            println!("Reset {stream} (was at block {})", cp.block_number);
        }
        None => println!("{stream}: no cursor to reset"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(line: &str) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(line.split_whitespace())
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse("blockcrawl info").unwrap().command, Command::Info);
        assert_eq!(
            parse("blockcrawl status --db x.db").unwrap().command,
            Command::Status { db: "x.db".into(), stream: None }
        );
        assert_eq!(
            parse("blockcrawl reset --stream s --db x.db").unwrap().command,
            Command::Reset { db: "x.db".into(), stream: "s".into() }
        );
        assert_eq!(
            parse("blockcrawl status --db=x.db --stream=eth:usdc").unwrap().command,
            Command::Status { db: "x.db".into(), stream: Some("eth:usdc".into()) }
        );
    }

    #[test]
    fn log_level_is_global() {
        let cli = parse("blockcrawl info --log-level debug").unwrap();
        assert_eq!(cli.log_level, "debug");
        assert_eq!(parse("blockcrawl info").unwrap().log_level, "warn");
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse("blockcrawl").is_err());
        assert!(parse("blockcrawl crawl").is_err());
        assert!(parse("blockcrawl reset --db x.db").is_err());
        assert!(parse("blockcrawl status --db").is_err());
    }

    #[test]
    fn describes_checkpoint() {
        let cp = Checkpoint {
            stream: "eth:usdc".into(),
            block_number: 19_000_000,
            updated_at: 0,
        };
        assert_eq!(
            describe(&cp),
            "eth:usdc: block 19000000 (resumes at 19000001), updated 1970-01-01T00:00:00+00:00"
        );
    }
}
