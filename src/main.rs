use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dbpool::config::PoolConfig;
use dbpool::mysql::MySqlConnector;
use dbpool::pool::Pool;

#[derive(Parser)]
#[command(name = "dbpool")]
#[command(version, about = "MySQL connection pool with circuit breaker and live metrics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (YAML); falls back to DBPOOL_* environment variables
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe the database directly and report latency and pool state
    Health,

    /// Print the full metrics snapshot
    Metrics,

    /// Print point-in-time pool occupancy
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // One-shot commands over sequential I/O; a current-thread runtime is
    // sufficient.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let config = PoolConfig::load(cli.config.as_deref())?;
    let connector = MySqlConnector::new(&config);
    let pool = Pool::connect(config, connector).await?;

    let output = match cli.command {
        Commands::Health => serde_json::to_string_pretty(&pool.health_check().await)?,
        Commands::Metrics => serde_json::to_string_pretty(&pool.metrics())?,
        Commands::Stats => serde_json::to_string_pretty(&pool.stats().await)?,
    };
    println!("{output}");

    pool.close_all().await;
    Ok(())
}
