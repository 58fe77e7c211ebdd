// Scene Gate - Main Entry Point
//
// CLI front-end for the admission controller:
// - check whether a session may call the generation endpoint
// - run a full admitted cycle (check, then consume)
// - inspect the shared global buckets

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scene_gate::config::Config;
use scene_gate::rate_limit::{Decision, Granularity, RateLimiter};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// Scene Gate: admission control for the scene generation service
#[derive(Parser, Debug)]
#[command(name = "scene-gate")]
#[command(author = "Scene Gate Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Token-bucket admission control for scene generation", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to a TOML configuration file (default: XDG config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check whether a session would be admitted (spends nothing)
    Check {
        /// Session identity to check
        session: String,
    },
    /// Run one admitted cycle: check, then consume a token on admission
    Consume {
        /// Session identity to charge
        session: String,
    },
    /// Show the shared global bucket levels
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Initialize tracing
    let filter = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(filter.into())
                .from_env_lossy(),
        )
        .init();

    // Load configuration; problems here are fatal, never per-request
    let config = match &args.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => Config::load()?,
    };

    let limiter = RateLimiter::new(&config)?;

    match args.command {
        Some(Commands::Check { session }) => {
            check(&limiter, &session).await;
        }
        Some(Commands::Consume { session }) => {
            consume(&limiter, &session).await;
        }
        Some(Commands::Status) => {
            status(&limiter, &config).await;
        }
        None => {
            info!("No command specified. Use \"scene-gate --help\" for usage.");
        }
    }

    Ok(())
}

/// Print the admission decision for a session without spending quota.
async fn check(limiter: &RateLimiter, session: &str) {
    match limiter.check(session).await {
        Decision::Admit => println!("admitted"),
        Decision::Deny(denial) => {
            println!("denied: {} (retry after {}s)", denial.reason.code(), denial.retry_after_secs);
        }
    }
}

/// Run one full cycle the way a request handler would: check, hand the
/// request to the generation call, then consume on success.
async fn consume(limiter: &RateLimiter, session: &str) {
    match limiter.check(session).await {
        Decision::Admit => {
            // The gated generation call happens here in a real deployment
            limiter.consume(session).await;
            println!("admitted, one token consumed");
        }
        Decision::Deny(denial) => {
            let body = denial.to_error_body();
            // The 429 body a caller-facing collaborator would return
            println!(
                "{}",
                serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.message)
            );
        }
    }
}

/// Print the shared bucket levels alongside their configured maxima.
async fn status(limiter: &RateLimiter, config: &Config) {
    for (granularity, bucket) in limiter.global_status().await {
        let max = match granularity {
            Granularity::Minute => config.rate_limits.global.per_minute,
            Granularity::Day => config.rate_limits.global.per_day,
        };
        let refilled = chrono::DateTime::<chrono::Utc>::from_timestamp(bucket.last_refill as i64, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "global per-{granularity}: {}/{max} tokens (last refill {refilled})",
            bucket.tokens
        );
    }
}
