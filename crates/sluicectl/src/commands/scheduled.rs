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

//! Implementation of the `scheduled` command.
//!
//! Without explicit bounds the whole id range of the outbox is scanned,
//! split into `id_partitions` ranges the same way the background sweep does.

use anyhow::{anyhow, Context, Result};
use sluice::outbox::scheduler::id_partitions;
use sluice::{OutboxConfig, ScheduledShard, DAL};
use tracing::info;

async fn collect(
    dal: &DAL,
    config: &OutboxConfig,
    low: Option<i64>,
    high: Option<i64>,
) -> Result<Vec<ScheduledShard>> {
    let (low, high) = match (low, high) {
        (Some(low), Some(high)) => (low, high),
        (low, high) => {
            let Some((min_id, max_id)) = dal
                .outbox()
                .id_bounds()
                .await
                .context("Failed to read outbox id range")?
            else {
                return Ok(Vec::new());
            };
            (low.unwrap_or(min_id), high.unwrap_or(max_id.saturating_add(1)))
        }
    };
    if low > high {
        return Err(anyhow!("--low ({}) must not exceed --high ({})", low, high));
    }

    let mut shards: Vec<ScheduledShard> = Vec::new();
    // [low, high) as the inclusive range the partitioner expects
    for (start, end) in id_partitions(low, high.saturating_sub(1), config.id_partitions()) {
        let found = dal
            .outbox()
            .find_scheduled_shards(start, end)
            .await
            .with_context(|| format!("Failed to scan ids [{}, {})", start, end))?;
        for shard in found {
            if !shards.iter().any(|known| known.key == shard.key) {
                shards.push(shard);
            }
        }
    }
    Ok(shards)
}

/// Prints shards with due messages in `[low, high)`.
pub async fn run(
    database_url: &str,
    config: &OutboxConfig,
    low: Option<i64>,
    high: Option<i64>,
) -> Result<()> {
    let dal = super::connect(database_url, config)?;
    let shards = collect(&dal, config, low, high).await?;

    if shards.is_empty() {
        info!("No shards are due");
        return Ok(());
    }

    println!("{:<32}  {:>12}  EARLIEST", "SHARD", "LATEST ID");
    for shard in &shards {
        println!(
            "{:<32}  {:>12}  {}",
            shard.key.to_string(),
            shard.latest_id,
            shard.earliest_scheduled_for
        );
    }
    Ok(())
}
