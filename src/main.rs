use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use miles_ratelimit::config::LimiterConfig;
use miles_ratelimit::metrics::PrometheusMetrics;
use miles_ratelimit::ratelimit::{LimitCategory, RateLimiter};
use miles_ratelimit::report::status_report;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "miles-ratelimit")]
#[command(about = "Inspect and exercise the Miles rate limiter")]
#[command(version)]
struct Cli {
    /// Config file path (YAML, TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Print Prometheus counters when the command finishes
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Spend quota and print each decision
    Check {
        #[arg(long)]
        category: LimitCategory,
        #[arg(long)]
        id: String,
        #[arg(long, default_value_t = 1)]
        cost: u32,
        /// Number of consecutive checks
        #[arg(long, default_value_t = 1)]
        times: u32,
    },
    /// Print one identifier's standing as JSON, without spending quota
    Stats {
        #[arg(long)]
        category: LimitCategory,
        #[arg(long)]
        id: String,
    },
    /// Print the user-facing status message
    Status {
        #[arg(long)]
        id: String,
    },
    /// List configured policies
    Limits,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = LimiterConfig::load(cli.config.as_deref())?;
    let metrics = Arc::new(PrometheusMetrics::new()?);
    let limiter = Arc::new(
        RateLimiter::from_config(&config)
            .await
            .with_metrics(metrics.clone()),
    );
    let sweeper = limiter.spawn_sweeper(config.sweep_interval());
    info!(backend = limiter.backend_name(), "Rate limiter initialized");

    match cli.command {
        Command::Check {
            category,
            id,
            cost,
            times,
        } => {
            for _ in 0..times {
                let decision = limiter.check(category, &id, cost).await;
                println!("{}", serde_json::to_string(&decision)?);
            }
        }
        Command::Stats { category, id } => match limiter.stats(category, &id).await {
            Some(stats) => println!("{}", serde_json::to_string_pretty(&stats)?),
            None => println!("{} is not limited", category),
        },
        Command::Status { id } => {
            println!("{}", status_report(&limiter, &id).await);
        }
        Command::Limits => {
            for (category, limit) in limiter.limits() {
                println!("{:<18} {}", category, limit);
            }
        }
    }

    if cli.metrics {
        print!("{}", metrics.render()?);
    }

    sweeper.abort();
    limiter.shutdown().await;
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so command output stays machine-readable
    match format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}
