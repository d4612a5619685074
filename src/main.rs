//! # Review Harvest CLI (`harvest`)
//!
//! The `harvest` binary drives collection and reporting. Every command reads
//! the same TOML configuration file.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `harvest init` | Create the SQLite database and run schema migrations |
//! | `harvest import <csv>` | Load a source list into the targets table |
//! | `harvest discover <url> --district <name>` | Add targets from a listing page |
//! | `harvest collect` | Collect reviews newer than each target's watermark |
//! | `harvest profiles` | Collect category and criteria scores per target |
//! | `harvest report` | Regenerate every aggregation report as CSV |
//! | `harvest export <collection>` | Write stored records as CSV |
//! | `harvest stats` | Show counts and per-district breakdown |
//!
//! Results go to stdout. Logs (`RUST_LOG`, default `info`) and progress
//! lines go to stderr.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use review_harvest::progress::ProgressMode;
use review_harvest::{
    collector, config, discover, export, migrate, profiles, report, stats, targets,
};

/// Review Harvest CLI: incremental review collection and aggregation reports.
#[derive(Parser)]
#[command(
    name = "harvest",
    about = "Incremental restaurant review collector and aggregation reporter",
    version,
    long_about = "Review Harvest collects restaurant reviews from a food-review site into SQLite, \
    stopping at each restaurant's last collected review, and writes a fixed set of aggregation \
    reports as CSV."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/harvest.toml`.
    #[arg(long, global = true, default_value = "./config/harvest.toml")]
    config: PathBuf,

    /// Progress on stderr: `off`, `human` or `json`. Defaults to human on a
    /// terminal and off otherwise.
    #[arg(long, global = true)]
    progress: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the targets, reviews and
    /// profiles tables. Running it again is safe.
    Init,

    /// Import a CSV source list into the targets table.
    ///
    /// Required columns: `restaurant_url`, `restaurant_name`, `district`.
    /// An `address` column is optional.
    Import {
        /// Path to the CSV source list.
        path: PathBuf,
    },

    /// Discover targets from a district listing page.
    Discover {
        /// Listing page URL.
        url: String,

        /// District tag stored on every discovered target.
        #[arg(long)]
        district: String,
    },

    /// Collect new reviews for every stored target.
    Collect {
        /// Visit at most this many targets.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Collect restaurant profiles for targets that lack a complete one.
    Profiles {
        /// Visit at most this many targets.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Regenerate every aggregation report.
    Report {
        /// Output directory; overrides `report.output_dir`.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Export a collection (`reviews`, `profiles` or `targets`) as CSV.
    Export {
        collection: String,

        /// Output file. Writes to stdout when omitted.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Show database statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let progress = ProgressMode::parse(cli.progress.as_deref())?.reporter();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { path } => {
            targets::run_import(&cfg, &path).await?;
        }
        Commands::Discover { url, district } => {
            discover::run_discover(&cfg, &url, &district, progress.as_ref()).await?;
        }
        Commands::Collect { limit } => {
            collector::run_collect(&cfg, limit, progress.as_ref()).await?;
        }
        Commands::Profiles { limit } => {
            profiles::run_profiles(&cfg, limit, progress.as_ref()).await?;
        }
        Commands::Report { output_dir } => {
            let run = report::run_report(&cfg, output_dir.as_deref()).await?;
            if !run.failed.is_empty() {
                anyhow::bail!("{} report(s) failed", run.failed.len());
            }
        }
        Commands::Export { collection, output } => {
            let kind = export::ExportKind::parse(&collection)?;
            export::run_export(&cfg, kind, output.as_deref()).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
