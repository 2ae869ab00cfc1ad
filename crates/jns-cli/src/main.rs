use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jns_core::SyncConfig;
use jns_sync::SyncPipeline;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "jns-cli")]
#[command(about = "Mirror Jira issues into a Notion database")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync and exit
    Sync {
        /// Decide creates without writing to Notion
        #[arg(long)]
        dry_run: bool,
        /// Keep going after a failed create; the run still exits non-zero
        #[arg(long)]
        continue_on_error: bool,
    },
    /// Print the JQL the next sync would run
    Jql,
    /// Run sync on a cron schedule until interrupted
    Watch {
        /// Six-field cron expression (overrides SYNC_CRON)
        #[arg(long)]
        cron: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = SyncConfig::from_env().context("loading configuration")?;

    match cli.command.unwrap_or(Commands::Sync {
        dry_run: false,
        continue_on_error: false,
    }) {
        Commands::Sync {
            dry_run,
            continue_on_error,
        } => {
            config.dry_run |= dry_run;
            config.continue_on_error |= continue_on_error;
            let summary = SyncPipeline::new(config)?.run_once().await?;
            println!(
                "sync complete: run_id={} fetched={} created={} skipped={} dry_run={} timestamp_updated={}",
                summary.run_id,
                summary.fetched,
                summary.created,
                summary.skipped,
                summary.dry_run,
                summary.timestamp_updated
            );
        }
        Commands::Jql => {
            println!("{}", jns_jira::build_jql(&config.jira)?);
        }
        Commands::Watch { cron } => {
            if let Some(cron) = cron {
                config.sync_cron = cron;
            }
            let pipeline = Arc::new(SyncPipeline::new(config)?);
            info!(cron = %pipeline.config().sync_cron, "starting scheduled sync");
            let mut sched = pipeline.build_scheduler().await?;
            sched.start().await.context("starting scheduler")?;
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}
