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

//! Implementation of the `reset-shard` command.

use anyhow::{Context, Result};
use sluice::{OutboxConfig, ShardKey, ShardScope};
use tracing::info;

/// Resets the backoff of every message in one shard.
pub async fn run(
    database_url: &str,
    config: &OutboxConfig,
    scope: ShardScope,
    shard_identifier: i64,
    region: Option<String>,
) -> Result<()> {
    let key = match region {
        Some(region) => ShardKey::in_region(region, scope, shard_identifier),
        None => ShardKey::new(scope, shard_identifier),
    };

    let dal = super::connect(database_url, config)?;
    let reset = dal
        .outbox()
        .reset_shard_schedule(&key)
        .await
        .with_context(|| format!("Failed to reset shard {}", key))?;

    if reset == 0 {
        info!("Shard {} has no pending messages", key);
    } else {
        info!("Reset schedule of {} message(s) in shard {}", reset, key);
    }
    Ok(())
}
