//! # pool-chaos
//!
//! Run pool fault-injection scenarios against a storage cluster.
//!
//! ## Commands
//!
//! - `run`: Run one or more scenarios and print a report per scenario
//! - `list`: List scenario names
//! - `pool-query`: Print a pool's version, space and rebuild state
//! - `default-config`: Print the default harness config as TOML
//!
//! ## Example
//!
//! ```bash
//! # Start from the defaults
//! pool-chaos default-config > harness.toml
//!
//! # Drain, then restart the cluster
//! pool-chaos run --config harness.toml offline-drain server-restart
//!
//! # Machine-readable reports, debug logging
//! pool-chaos -v run --config harness.toml --json metadata-addremove
//! ```
//!
//! `run` exits with status 1 if any scenario failed.

use anyhow::Result;
use chaos_tests::ScenarioKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{config, query, run};

/// Run pool fault-injection scenarios against a storage cluster.
#[derive(Parser, Debug)]
#[command(name = "pool-chaos")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run scenarios in order
    Run {
        /// Harness config file
        #[arg(long, short)]
        config: PathBuf,

        /// Print reports as JSON
        #[arg(long)]
        json: bool,

        /// Scenarios to run
        #[arg(required = true)]
        scenarios: Vec<ScenarioKind>,
    },

    /// List scenario names
    List,

    /// Query a pool
    PoolQuery {
        /// Harness config file
        #[arg(long, short)]
        config: PathBuf,

        /// Pool label
        #[arg(long, short)]
        pool: String,
    },

    /// Print the default config
    DefaultConfig,
}

fn init_logging(verbose: u8) {
    // RUST_LOG wins over -v
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            json,
            scenarios,
        } => {
            let passed = run::run(&config, &scenarios, json).await?;
            if !passed {
                std::process::exit(1);
            }
        }
        Commands::List => {
            for kind in ScenarioKind::ALL {
                println!("{}", kind);
            }
        }
        Commands::PoolQuery { config, pool } => {
            query::run(&config, &pool).await?;
        }
        Commands::DefaultConfig => {
            print!("{}", config::default_toml()?);
        }
    }

    Ok(())
}
