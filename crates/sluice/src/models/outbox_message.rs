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

//! Outbox message domain types.
//!
//! These are the types producers and handlers see. The storage row lives in
//! `dal::models` and converts into [`OutboxMessage`] on load.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{CoalesceKey, OutboxCategory, ShardKey, ShardScope};
use crate::error::ValidationError;
use crate::outbox::scheduler;

/// A pending cross-node notification.
///
/// Rows are immutable apart from `scheduled_from` / `scheduled_for`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Monotonic id assigned at insert
    pub id: i64,
    pub shard_scope: ShardScope,
    pub shard_identifier: i64,
    pub category: OutboxCategory,
    pub object_identifier: i64,
    pub payload: Option<serde_json::Value>,
    /// Set only for messages bound to a specific region
    pub region_name: Option<String>,
    /// Start of the current backoff interval
    pub scheduled_from: NaiveDateTime,
    /// The message must not be reserved before this instant
    pub scheduled_for: NaiveDateTime,
    pub date_added: NaiveDateTime,
}

impl OutboxMessage {
    pub fn shard_key(&self) -> ShardKey {
        ShardKey {
            region_name: self.region_name.clone(),
            scope: self.shard_scope,
            shard_identifier: self.shard_identifier,
        }
    }

    pub fn coalesce_key(&self) -> CoalesceKey {
        self.shard_key()
            .coalesce(self.category, self.object_identifier)
    }

    /// Whether the message may be reserved at `now`.
    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        self.scheduled_for <= now
    }

    /// The retry instant following a reservation at `now`.
    pub fn next_schedule(&self, now: NaiveDateTime) -> NaiveDateTime {
        scheduler::next_schedule(self.scheduled_from, self.scheduled_for, now)
    }
}

/// A message to enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboxMessage {
    pub shard_scope: ShardScope,
    pub shard_identifier: i64,
    pub category: OutboxCategory,
    pub object_identifier: i64,
    pub payload: Option<serde_json::Value>,
    pub region_name: Option<String>,
}

impl NewOutboxMessage {
    pub fn new(
        shard_scope: ShardScope,
        shard_identifier: i64,
        category: OutboxCategory,
        object_identifier: i64,
    ) -> Self {
        Self {
            shard_scope,
            shard_identifier,
            category,
            object_identifier,
            payload: None,
            region_name: None,
        }
    }

    /// Builds a message under the scope the category is registered for.
    pub fn for_category(category: OutboxCategory, shard_identifier: i64, object_identifier: i64) -> Self {
        Self::new(category.scope(), shard_identifier, category, object_identifier)
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Binds the message to a destination region.
    pub fn with_region(mut self, region_name: impl Into<String>) -> Self {
        self.region_name = Some(region_name.into());
        self
    }

    pub fn shard_key(&self) -> ShardKey {
        ShardKey {
            region_name: self.region_name.clone(),
            scope: self.shard_scope,
            shard_identifier: self.shard_identifier,
        }
    }

    /// Rejects a category that is not registered for the shard scope.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.category.validate_scope(self.shard_scope)
    }
}
