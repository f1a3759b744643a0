use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use gamedex_core::{AppId, SyncReport, UserId};
use gamedex_index::{NAME_SEARCH_LIMIT, TAG_SEARCH_LIMIT};
use gamedex_sync::{build_services, GamedexConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gamedex-cli")]
#[command(about = "Game catalog sync and query tool")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch every app the local catalog does not know yet.
    Sync,
    /// Re-fetch a single app, even if already known. Operator only.
    Refresh {
        id: AppId,
        /// Caller identity, checked against `GAMEDEX_OPERATOR_ID`.
        #[arg(long = "as", allow_negative_numbers = true)]
        caller: UserId,
    },
    /// Remove an app from both catalog partitions. Operator only.
    Purge {
        id: AppId,
        #[arg(long = "as", allow_negative_numbers = true)]
        caller: UserId,
    },
    /// Report duplicated IDs and entries with empty fields.
    Audit,
    /// Write the complete partition keyed by app ID.
    Export { path: PathBuf },
    Serve,
    Search {
        query: String,
        /// Match against top tags instead of names.
        #[arg(long)]
        tag: bool,
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn print_report(label: &str, report: &SyncReport) {
    println!(
        "{label} complete: run_id={} processed={} new_complete={} new_incomplete={} failed={}",
        report.run_id, report.processed, report.new_complete, report.new_incomplete, report.failed
    );
    if !report.failed_ids.is_empty() {
        println!("failed ids: {:?}", report.failed_ids);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Sync);
    if let Commands::Serve = command {
        return gamedex_web::serve_from_env().await;
    }

    let config = GamedexConfig::from_env();
    let services = build_services(&config).await?;
    let engine = &services.engine;

    match command {
        Commands::Sync => print_report("sync", &engine.run_sync().await?),
        Commands::Refresh { id, caller } => {
            services.gate.authorize(caller)?;
            print_report("refresh", &engine.refresh(id).await?)
        }
        Commands::Purge { id, caller } => {
            services.gate.authorize(caller)?;
            if engine.purge(id).await? {
                println!("purged {id}");
            } else {
                println!("{id} is not in the catalog");
            }
        }
        Commands::Audit => println!("{}", serde_json::to_string_pretty(&engine.audit().await)?),
        Commands::Export { path } => {
            engine.export_keyed(&path).await?;
            println!("exported complete partition to {}", path.display());
        }
        Commands::Search { query, tag, limit } => {
            let hits = if tag {
                services.index.search_by_tag(&query, limit.unwrap_or(TAG_SEARCH_LIMIT))
            } else {
                services.index.search_by_name(&query, limit.unwrap_or(NAME_SEARCH_LIMIT))
            };
            for hit in hits {
                println!(
                    "{}: {} - {} ({} reviews)",
                    hit.record.id, hit.record.name, hit.record.price, hit.total_reviews
                );
            }
        }
        Commands::Serve => {}
    }

    Ok(())
}
