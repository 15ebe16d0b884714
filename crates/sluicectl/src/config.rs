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

//! TOML configuration for sluicectl.
//!
//! ```toml
//! [database]
//! url = "postgres://localhost/app"
//!
//! [outbox]
//! db_pool_size = 4
//! id_partitions = 32
//! reservation_scopes = ["webhook"]
//!
//! [[outbox.disabled]]
//! scope = "organization"
//! shards = [17, 42]
//!
//! [[outbox.disabled]]
//! scope = "audit_log"
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use sluice::{OutboxConfig, ShardScope};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
    #[serde(default)]
    database: DatabaseSection,
    #[serde(default)]
    outbox: OutboxSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatabaseSection {
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct OutboxSection {
    poll_interval_secs: Option<u64>,
    id_partitions: Option<usize>,
    max_concurrent_shards: Option<usize>,
    delete_batch_size: Option<usize>,
    db_pool_size: Option<u32>,
    reservation_scopes: Option<Vec<ShardScopeName>>,
    #[serde(default)]
    disabled: Vec<DisabledEntry>,
}

/// A kill switch entry. Without `shards` the whole scope is disabled.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DisabledEntry {
    scope: ShardScopeName,
    shards: Option<Vec<i64>>,
}

/// Scope written by name, accepting the same spellings as the command line.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(try_from = "String")]
struct ShardScopeName(ShardScope);

impl TryFrom<String> for ShardScopeName {
    type Error = sluice::ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse().map(ShardScopeName)
    }
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn database_url(&self) -> Option<&str> {
        self.database.url.as_deref()
    }

    /// Builds the outbox configuration, starting from the library defaults.
    pub fn outbox_config(&self) -> OutboxConfig {
        let section = &self.outbox;
        let mut builder = OutboxConfig::builder();

        if let Some(secs) = section.poll_interval_secs {
            builder = builder.poll_interval(Duration::from_secs(secs));
        }
        if let Some(partitions) = section.id_partitions {
            builder = builder.id_partitions(partitions);
        }
        if let Some(shards) = section.max_concurrent_shards {
            builder = builder.max_concurrent_shards(shards);
        }
        if let Some(size) = section.delete_batch_size {
            builder = builder.delete_batch_size(size);
        }
        if let Some(size) = section.db_pool_size {
            builder = builder.db_pool_size(size);
        }
        if let Some(scopes) = &section.reservation_scopes {
            builder = builder.reservation_scopes(scopes.iter().map(|name| name.0));
        }
        for entry in &section.disabled {
            builder = match &entry.shards {
                None => builder.disable_scope(entry.scope.0),
                Some(shards) => shards
                    .iter()
                    .fold(builder, |builder, id| builder.disable_shard(entry.scope.0, *id)),
            };
        }

        builder.build()
    }
}
