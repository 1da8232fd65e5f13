use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ratewatch_core::ReportRow;
use ratewatch_storage::{load_promo_codes_yaml, RateStore};
use ratewatch_sync::{open_store, promo_codes_for_seeding, RefreshPipeline, SyncConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ratewatch-cli")]
#[command(about = "Resort rate watch command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one full refresh and replace the stored rates.
    Refresh,
    /// Create the schema and seed promo codes.
    Migrate {
        #[arg(long)]
        seed: Option<PathBuf>,
    },
    /// Print the ranked stay-cost report as a markdown table.
    Report {
        /// Promo description to filter on.
        #[arg(long)]
        promo: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Run refreshes on the configured cron until interrupted.
    Schedule,
    /// Serve the HTML and JSON rate report.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Refresh) {
        Commands::Refresh => {
            let summary = ratewatch_sync::run_refresh_once_from_env().await?;
            println!(
                "refresh complete: run_id={} tuples={} fetched={} skipped={} persisted={}",
                summary.run_id,
                summary.tuples,
                summary.fetched_pages,
                summary.skipped_tuples,
                summary.persisted_observations
            );
        }
        Commands::Migrate { seed } => {
            let config = SyncConfig::from_env();
            let store = open_store(&config).await?;
            let codes = match seed {
                Some(path) => load_promo_codes_yaml(&path)?,
                None => promo_codes_for_seeding(&config)?,
            };
            let seeded = store.seed_promo_codes(&codes).await?;
            println!("schema ready at {}; seeded {seeded} promo codes", config.database_url);
        }
        Commands::Report { promo, limit } => {
            let config = SyncConfig::from_env();
            let store = open_store(&config).await?;
            let mut rows = store.query(promo.as_deref()).await?;
            if let Some(limit) = limit {
                rows.truncate(limit);
            }
            print!("{}", markdown_report(&rows));
        }
        Commands::Schedule => {
            let config = SyncConfig {
                scheduler_enabled: true,
                ..SyncConfig::from_env()
            };
            let cron = config.refresh_cron.clone();
            let pipeline = Arc::new(RefreshPipeline::from_config(config).await?);
            let Some(mut scheduler) = pipeline.maybe_build_scheduler().await? else {
                return Ok(());
            };
            scheduler.start().await.context("starting scheduler")?;
            info!(%cron, "scheduler running; ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            scheduler.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Serve => {
            ratewatch_web::serve_from_env().await?;
        }
    }

    Ok(())
}

fn markdown_report(rows: &[ReportRow]) -> String {
    let mut out = String::from(
        "| Total Cost | Hotel | Nights | Promo | Check-in | Check-out | Nightly Rate | Search |\n\
         |---:|---|---:|---|---|---|---:|---|\n",
    );
    for row in rows {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} | {} |\n",
            row.total_cost,
            cell(&row.hotel_name),
            row.num_nights,
            cell(&row.description),
            row.check_in_date,
            row.check_out_date,
            row.nightly_rate,
            row.search_link_markdown()
        ));
    }
    out
}

fn cell(text: &str) -> String {
    text.replace('|', "\\|")
}
