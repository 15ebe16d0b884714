/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! sluicectl - operator command-line interface for the sluice outbox.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sluice::ShardScope;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;

use config::CliConfig;

/// Sluice - inspect and operate a transactional outbox
#[derive(Parser)]
#[command(name = "sluicectl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (can also be set via DATABASE_URL environment variable)
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Path to a TOML configuration file
    #[arg(long, env = "SLUICE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending outbox schema migrations
    Migrate,

    /// Show the shards with the most pending messages
    Depths {
        /// Number of shards to show
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// List shards with due messages
    Scheduled {
        /// Lowest message id to consider (defaults to the smallest pending id)
        #[arg(long)]
        low: Option<i64>,

        /// Exclusive upper message id (defaults to one past the largest pending id)
        #[arg(long)]
        high: Option<i64>,
    },

    /// Make a backed-off shard eligible for delivery immediately
    ResetShard {
        /// Shard scope, e.g. "organization" or "webhook"
        #[arg(long)]
        scope: ShardScope,

        /// Shard identifier
        #[arg(long)]
        id: i64,

        /// Region of the shard, if the outbox is region-partitioned
        #[arg(long)]
        region: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // a local .env may supply DATABASE_URL
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = match &cli.config {
        Some(path) => CliConfig::load(path)?,
        None => CliConfig::default(),
    };
    let database_url = cli
        .database_url
        .or_else(|| config.database_url().map(str::to_string))
        .context("Database URL is required. Set --database-url, DATABASE_URL or database.url in the config file")?;
    let outbox_config = config.outbox_config();

    match cli.command {
        Commands::Migrate => commands::migrate::run(&database_url, &outbox_config).await?,
        Commands::Depths { limit } => {
            commands::depths::run(&database_url, &outbox_config, limit).await?
        }
        Commands::Scheduled { low, high } => {
            commands::scheduled::run(&database_url, &outbox_config, low, high).await?
        }
        Commands::ResetShard { scope, id, region } => {
            commands::reset_shard::run(&database_url, &outbox_config, scope, id, region).await?
        }
    }

    Ok(())
}
