//! Cloud Cost Optimizer CLI
//!
//! A command-line tool for seeding utilization data, training the downsize
//! model, and querying recommendations, explanations and cost analytics.

mod commands;
mod config;
mod output;

use anyhow::Result;
use ccopt_lib::{InstanceFilter, RecommendationFilter};
use clap::{Parser, Subcommand};
use commands::{costs, model, recommendations, seed};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Cloud Cost Optimizer CLI
#[derive(Parser)]
#[command(name = "ccopt")]
#[command(author, version, about = "Rightsizing recommendations for cloud instances", long_about = None)]
pub struct Cli {
    /// Settings file (defaults to ./ccopt.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Metrics snapshot path (overrides the settings file)
    #[arg(long, global = true)]
    pub snapshot: Option<PathBuf>,

    /// Model directory (overrides the settings file)
    #[arg(long, global = true)]
    pub model_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a synthetic metrics snapshot
    Seed {
        /// Number of instances
        #[arg(long, default_value_t = 100)]
        instances: usize,

        /// Days of hourly samples
        #[arg(long, default_value_t = 7)]
        days: i64,

        /// Random seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },

    /// Train a new model version on the current snapshot
    Train,

    /// List keep/downsize recommendations
    Recommend {
        /// Filter by environment
        #[arg(long, short)]
        environment: Option<String>,

        /// Filter by region
        #[arg(long, short)]
        region: Option<String>,

        /// Filter by instance type
        #[arg(long, short = 't')]
        instance_type: Option<String>,

        /// Minimum projected monthly savings
        #[arg(long, default_value_t = 0.0)]
        min_savings: f64,

        /// Show only downsize recommendations
        #[arg(long)]
        downsize_only: bool,
    },

    /// Explain the recommendation for one instance
    Explain {
        /// Instance reference
        instance: String,
    },

    /// Show portfolio cost totals
    Analytics,

    /// Generate a short overview of portfolio savings
    Summary,

    /// Show the daily cost trend
    Trends {
        /// Days to look back (1-90)
        #[arg(long, default_value_t = 30)]
        days: u32,
    },

    /// Show the latest model's metadata
    Model,

    /// Print Prometheus metrics after one evaluation pass
    Metrics,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut settings = config::Settings::load(cli.config.as_deref())?;
    if let Some(path) = cli.snapshot {
        settings.snapshot_path = path;
    }
    if let Some(dir) = cli.model_dir {
        settings.model_dir = dir;
    }

    if let Commands::Seed {
        instances,
        days,
        seed,
    } = cli.command
    {
        return seed::seed(&settings, instances, days, seed, cli.format);
    }

    let optimizer = commands::build_optimizer(&settings)?;
    match cli.command {
        Commands::Seed { .. } => {}
        Commands::Train => model::train(&optimizer, cli.format).await?,
        Commands::Recommend {
            environment,
            region,
            instance_type,
            min_savings,
            downsize_only,
        } => {
            let filter = RecommendationFilter {
                instances: InstanceFilter {
                    environment,
                    region,
                    instance_type,
                },
                min_savings,
            };
            recommendations::get_recommendations(&optimizer, filter, downsize_only, cli.format).await?;
        }
        Commands::Explain { instance } => {
            recommendations::explain(&optimizer, &instance, cli.format).await?;
        }
        Commands::Analytics => costs::show_analytics(&optimizer, cli.format).await?,
        Commands::Summary => costs::show_summary(&optimizer, cli.format).await?,
        Commands::Trends { days } => costs::show_trends(&optimizer, days, cli.format).await?,
        Commands::Model => model::show_model(&optimizer, cli.format)?,
        Commands::Metrics => costs::show_metrics(&optimizer).await?,
    }

    Ok(())
}
