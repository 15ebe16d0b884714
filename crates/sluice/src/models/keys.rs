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

//! Shard and coalesce keys.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{OutboxCategory, ShardScope};

/// Identifies a shard: the unit of ordering and mutual exclusion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardKey {
    /// Destination region; `None` for the region → control outbox.
    pub region_name: Option<String>,
    pub scope: ShardScope,
    pub shard_identifier: i64,
}

impl ShardKey {
    pub fn new(scope: ShardScope, shard_identifier: i64) -> Self {
        Self {
            region_name: None,
            scope,
            shard_identifier,
        }
    }

    pub fn in_region(region_name: impl Into<String>, scope: ShardScope, shard_identifier: i64) -> Self {
        Self {
            region_name: Some(region_name.into()),
            scope,
            shard_identifier,
        }
    }

    /// Extends the shard key into the key of one coalesce group.
    pub fn coalesce(&self, category: OutboxCategory, object_identifier: i64) -> CoalesceKey {
        CoalesceKey {
            shard: self.clone(),
            category,
            object_identifier,
        }
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(region) = &self.region_name {
            write!(f, "{}/", region)?;
        }
        write!(f, "{}:{}", self.scope, self.shard_identifier)
    }
}

/// Identifies a coalesce group: messages that supersede each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoalesceKey {
    pub shard: ShardKey,
    pub category: OutboxCategory,
    pub object_identifier: i64,
}

impl fmt::Display for CoalesceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}:{}",
            self.shard, self.category, self.object_identifier
        )
    }
}
