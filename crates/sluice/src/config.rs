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

//! Configuration for outbox draining.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::models::{ShardKey, ShardScope};

/// Which shards of a scope the kill switch drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisabledShards {
    /// Every shard of the scope.
    All,
    /// Only the listed shard identifiers.
    Only(HashSet<i64>),
}

/// Per-scope kill switch.
///
/// Messages of a disabled shard are deleted on drain without reaching their
/// handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KillSwitch {
    scopes: HashMap<ShardScope, DisabledShards>,
}

impl KillSwitch {
    pub fn disable_scope(&mut self, scope: ShardScope) {
        self.scopes.insert(scope, DisabledShards::All);
    }

    pub fn disable_shard(&mut self, scope: ShardScope, shard_identifier: i64) {
        match self
            .scopes
            .entry(scope)
            .or_insert_with(|| DisabledShards::Only(HashSet::new()))
        {
            DisabledShards::All => {}
            DisabledShards::Only(ids) => {
                ids.insert(shard_identifier);
            }
        }
    }

    /// Whether messages of this shard should be dropped undelivered.
    pub fn should_skip(&self, key: &ShardKey) -> bool {
        match self.scopes.get(&key.scope) {
            Some(DisabledShards::All) => true,
            Some(DisabledShards::Only(ids)) => ids.contains(&key.shard_identifier),
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

/// Configuration for the outbox and its background sweep.
///
/// Use [`OutboxConfig::builder()`] to create a configuration:
///
/// ```rust,ignore
/// let config = OutboxConfig::builder()
///     .poll_interval(Duration::from_secs(5))
///     .disable_shard(ShardScope::Organization, 42)
///     .build();
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct OutboxConfig {
    poll_interval: Duration,
    id_partitions: usize,
    max_concurrent_shards: usize,
    delete_batch_size: usize,
    db_pool_size: u32,
    reservation_scopes: HashSet<ShardScope>,
    kill_switch: KillSwitch,
}

impl OutboxConfig {
    /// Creates a new configuration builder with default values.
    pub fn builder() -> OutboxConfigBuilder {
        OutboxConfigBuilder::default()
    }

    /// How often the background sweep looks for due shards.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Number of id ranges each sweep splits the table into when looking
    /// for due shards.
    pub fn id_partitions(&self) -> usize {
        self.id_partitions
    }

    /// Maximum number of shards drained concurrently by one sweep.
    pub fn max_concurrent_shards(&self) -> usize {
        self.max_concurrent_shards
    }

    /// Number of superseded rows deleted per statement.
    pub fn delete_batch_size(&self) -> usize {
        self.delete_batch_size
    }

    /// Number of database connections in the pool.
    pub fn db_pool_size(&self) -> u32 {
        self.db_pool_size
    }

    /// Scopes whose messages are delivered outside the reserving transaction.
    pub fn reservation_scopes(&self) -> &HashSet<ShardScope> {
        &self.reservation_scopes
    }

    pub fn uses_reservation(&self, scope: ShardScope) -> bool {
        self.reservation_scopes.contains(&scope)
    }

    pub fn kill_switch(&self) -> &KillSwitch {
        &self.kill_switch
    }
}

/// Builder for [`OutboxConfig`].
#[derive(Debug, Clone)]
pub struct OutboxConfigBuilder {
    config: OutboxConfig,
}

impl Default for OutboxConfigBuilder {
    fn default() -> Self {
        Self {
            config: OutboxConfig {
                poll_interval: Duration::from_secs(10),
                id_partitions: 16,
                max_concurrent_shards: 8,
                delete_batch_size: 50,
                db_pool_size: 10,
                reservation_scopes: HashSet::from([ShardScope::Webhook]),
                kill_switch: KillSwitch::default(),
            },
        }
    }
}

impl OutboxConfigBuilder {
    pub fn poll_interval(mut self, value: Duration) -> Self {
        self.config.poll_interval = value;
        self
    }

    /// Sets the number of sweep id ranges. Values below 1 are raised to 1.
    pub fn id_partitions(mut self, value: usize) -> Self {
        self.config.id_partitions = value.max(1);
        self
    }

    /// Sets the sweep concurrency. Values below 1 are raised to 1.
    pub fn max_concurrent_shards(mut self, value: usize) -> Self {
        self.config.max_concurrent_shards = value.max(1);
        self
    }

    /// Sets the superseded-row delete batch. Values below 1 are raised to 1.
    pub fn delete_batch_size(mut self, value: usize) -> Self {
        self.config.delete_batch_size = value.max(1);
        self
    }

    pub fn db_pool_size(mut self, value: u32) -> Self {
        self.config.db_pool_size = value;
        self
    }

    /// Replaces the set of scopes drained with delivery outside the
    /// reserving transaction.
    pub fn reservation_scopes(mut self, scopes: impl IntoIterator<Item = ShardScope>) -> Self {
        self.config.reservation_scopes = scopes.into_iter().collect();
        self
    }

    /// Drops every message of a scope on drain.
    pub fn disable_scope(mut self, scope: ShardScope) -> Self {
        self.config.kill_switch.disable_scope(scope);
        self
    }

    /// Drops messages of a single shard on drain.
    pub fn disable_shard(mut self, scope: ShardScope, shard_identifier: i64) -> Self {
        self.config.kill_switch.disable_shard(scope, shard_identifier);
        self
    }

    pub fn kill_switch(mut self, kill_switch: KillSwitch) -> Self {
        self.config.kill_switch = kill_switch;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> OutboxConfig {
        self.config
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        OutboxConfigBuilder::default().build()
    }
}
