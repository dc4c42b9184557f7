use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use tracing_subscriber::EnvFilter;

use webshop_runner::batch::{DecisionBatcher, HttpDecisionClient};
use webshop_runner::browser::ChromeOpener;
use webshop_runner::pool::{PoolConfig, SessionPool};

/// Drive batches of automated shopping sessions against a WebShop-style
/// storefront, deciding every session's next action through one batched call
/// per tick to a remote prediction endpoint.
#[derive(Parser, Debug)]
#[command(name = "webshop-runner", version, about)]
struct Args {
    /// Number of sessions kept active at once.
    #[arg(long, default_value_t = 4)]
    parallel: usize,

    /// Total number of sessions to complete before exiting.
    #[arg(long, default_value_t = 1000)]
    total: usize,

    /// Storefront base URL; each session loads `{base_url}/{session_id}`.
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    base_url: String,

    /// Batch prediction endpoint of the decision service.
    #[arg(long)]
    decision_url: String,

    /// Directory receiving per-session traces and frames.
    #[arg(long, default_value = "user_session_logs/mturk")]
    log_root: PathBuf,

    /// Seconds before a batched decision call times out.
    #[arg(long, default_value_t = 120)]
    decision_timeout: u64,

    /// Seed for per-session resolution choice; omit for OS entropy.
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let token = std::env::var("DECISION_SERVICE_TOKEN")
        .context("DECISION_SERVICE_TOKEN not set in environment")?;

    let client = HttpDecisionClient::new(
        args.decision_url,
        token,
        Duration::from_secs(args.decision_timeout),
    )?;
    let batcher = DecisionBatcher::new(Box::new(client));
    let opener = Box::new(ChromeOpener {
        base_url: args.base_url,
    });
    let config = PoolConfig {
        parallel_limit: args.parallel,
        total_target: args.total,
        log_root: args.log_root,
        seed: args.seed,
    };

    let mut pool = SessionPool::new(config, opener, batcher);
    pool.run().await?;
    Ok(())
}
