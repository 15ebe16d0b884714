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

//! Implementation of the `depths` command.

use anyhow::{Context, Result};
use sluice::{OutboxConfig, ShardDepth};
use tracing::info;

pub(crate) fn format_depth(depth: &ShardDepth) -> String {
    format!("{:>10}  {}", depth.depth, depth.key)
}

/// Prints the `limit` deepest shards.
pub async fn run(database_url: &str, config: &OutboxConfig, limit: usize) -> Result<()> {
    let dal = super::connect(database_url, config)?;
    let depths = dal
        .outbox()
        .shard_depths(limit)
        .await
        .context("Failed to query shard depths")?;

    if depths.is_empty() {
        info!("Outbox is empty");
        return Ok(());
    }

    println!("{:>10}  SHARD", "PENDING");
    for depth in &depths {
        println!("{}", format_depth(depth));
    }
    Ok(())
}
