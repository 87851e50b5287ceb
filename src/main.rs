use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod error;
mod marts;
mod models;
mod pipeline;
mod report;
mod seed;
mod staging;
mod train;
mod warehouse;

use config::PipelineConfig;
use models::{EngagementRecord, RawAlert, RawSession, RawUser};
use pipeline::{Pipeline, RunOptions};
use report::DashboardData;
use staging::{ALERT_COLUMNS, SESSION_COLUMNS, USER_COLUMNS};
use warehouse::read_source;

#[derive(Parser)]
#[command(name = "chroniccare")]
#[command(about = "ChronicCare analytics pipeline: staging, marts and dropout-risk model", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./chroniccare.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run staging, marts and model training in sequence
    Run {
        /// Refresh fct_sessions from the trailing window only
        #[arg(long)]
        incremental: bool,
        /// Reference date for the incremental window (defaults to today)
        #[arg(long)]
        as_of: Option<NaiveDate>,
        #[arg(long)]
        skip_training: bool,
    },
    /// Render the analytics dashboard summary
    Dashboard {
        #[arg(long)]
        condition: Option<String>,
        /// Write the markdown here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Write synthetic sample CSVs into the data directory
    Seed {
        #[arg(long, default_value_t = 500)]
        users: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Overwrite existing sample files
        #[arg(long)]
        force: bool,
    },
    /// Create or upgrade the Postgres mart schema
    InitDb,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::load(cli.config.as_deref())
        .map_err(|err| anyhow::anyhow!("invalid configuration: {err}"))?;

    match cli.command {
        Commands::Run {
            incremental,
            as_of,
            skip_training,
        } => {
            let options = RunOptions {
                incremental,
                as_of: as_of.unwrap_or_else(|| Utc::now().date_naive()),
                skip_training,
            };
            let summary = Pipeline::new(config).run(&options).await?;

            println!("Pipeline finished:");
            for report in &summary.steps {
                println!("- {}: {}", report.step, report.detail);
                for output in &report.outputs {
                    println!("    {}", output.display());
                }
            }
        }
        Commands::Dashboard { condition, out } => {
            let data = load_dashboard_data(&config)?;
            if let Some(name) = condition.as_deref() {
                if !data.conditions().iter().any(|known| known == name) {
                    tracing::warn!(
                        condition = name,
                        known = ?data.conditions(),
                        "condition not present in users"
                    );
                }
            }

            let dashboard = report::build_dashboard(condition.as_deref(), &data);
            match out {
                Some(path) => {
                    std::fs::write(&path, dashboard)?;
                    println!("Dashboard written to {}.", path.display());
                }
                None => print!("{dashboard}"),
            }
        }
        Commands::Seed {
            users,
            seed: rng_seed,
            force,
        } => {
            if seed::sample_exists(&config.data_dir) && !force {
                anyhow::bail!(
                    "{} already holds sample data; pass --force to overwrite",
                    config.data_dir.display()
                );
            }
            let data = seed::generate(users, rng_seed, Utc::now().date_naive());
            seed::write_sample(&data, &config)?;
            println!(
                "Wrote {} users, {} sessions, {} alerts to {}.",
                data.users.len(),
                data.sessions.len(),
                data.alerts.len(),
                config.data_dir.display()
            );
        }
        Commands::InitDb => {
            let database_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set to a Postgres instance")?;
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await
                .context("failed to connect to Postgres")?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
    }

    Ok(())
}

fn load_dashboard_data(config: &PipelineConfig) -> anyhow::Result<DashboardData> {
    let users: Vec<RawUser> = read_source(&config.users_csv(), "users", &USER_COLUMNS)?;
    let sessions: Vec<RawSession> =
        read_source(&config.sessions_csv(), "sessions", &SESSION_COLUMNS)?;
    let alerts: Vec<RawAlert> = read_source(&config.alerts_csv(), "alerts", &ALERT_COLUMNS)?;
    let engagement: Vec<EngagementRecord> = read_source(
        &config.engagement_csv(),
        "engagement",
        &train::ENGAGEMENT_COLUMNS,
    )?;

    Ok(DashboardData {
        users: staging::stage_users(&users)?,
        sessions: staging::stage_sessions(&sessions)?,
        alerts: staging::stage_alerts(&alerts)?,
        engagement,
    })
}
