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

//! The outbox facade: enqueueing, post-commit flushing and shard draining.
//!
//! # Example
//!
//! ```rust,ignore
//! use sluice::{FlushMode, NewOutboxMessage, Outbox, OutboxCategory, OutboxConfig};
//!
//! let outbox = Outbox::new(database, handlers, OutboxConfig::default());
//! outbox
//!     .enqueue(
//!         NewOutboxMessage::for_category(OutboxCategory::OrganizationUpdate, org_id, org_id)
//!             .with_payload(serde_json::json!({"slug": "acme"})),
//!         FlushMode::Immediate,
//!     )
//!     .await?;
//! ```

pub mod coalesce;
pub mod delivery;
pub mod drain;
pub mod scheduler;

pub use coalesce::CoalescedGroup;
pub use delivery::{
    handler_fn, DeliveryInvoker, DeliveryOutcome, FnHandler, HandlerRegistry,
    HandlerRegistryBuilder, OutboxHandler,
};
pub use drain::{DrainReport, DrainState, DrainStop};

use std::sync::Arc;

use tracing::warn;

use crate::config::OutboxConfig;
use crate::dal::outbox::insert_message;
use crate::dal::{OutboxConnection, ScheduledShard, ShardDepth, ShardReservation, DAL};
use crate::database::Database;
use crate::error::OutboxError;
use crate::models::{NewOutboxMessage, OutboxMessage, ShardKey};
use drain::Drainer;

/// Whether a producer's commit drains the shards it wrote to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlushMode {
    /// Drain touched shards right after the write commits.
    #[default]
    Immediate,
    /// Leave delivery to the background sweep.
    Deferred,
}

/// Collects the shards a producer writes to inside its own transaction.
///
/// Enqueue through the context while the transaction is open, commit, then
/// hand the context to [`Outbox::flush_context`]. If the transaction rolls
/// back, drop the context instead: nothing was persisted.
///
/// Open the transaction with
/// [`OutboxConnection::blocking_write_transaction`] so it waits for a
/// drainer holding the SQLite write lock instead of failing.
#[derive(Debug, Clone, Default)]
pub struct OutboxContext {
    flush: FlushMode,
    shards: Vec<ShardKey>,
}

impl OutboxContext {
    pub fn new(flush: FlushMode) -> Self {
        Self {
            flush,
            shards: Vec::new(),
        }
    }

    pub fn flush_mode(&self) -> FlushMode {
        self.flush
    }

    /// Shards written through this context, in first-write order.
    pub fn shards(&self) -> &[ShardKey] {
        &self.shards
    }

    /// Validates and inserts a message on the caller's connection.
    pub fn enqueue<C: OutboxConnection>(
        &mut self,
        conn: &mut C,
        message: NewOutboxMessage,
    ) -> Result<OutboxMessage, OutboxError> {
        let inserted = insert_message(conn, &message)?;
        let key = inserted.shard_key();
        if !self.shards.contains(&key) {
            self.shards.push(key);
        }
        Ok(inserted)
    }
}

/// Transactional outbox bound to one database.
#[derive(Debug, Clone)]
pub struct Outbox {
    dal: DAL,
    drainer: Drainer,
    config: Arc<OutboxConfig>,
}

impl Outbox {
    /// Creates an outbox delivering through `handlers`.
    pub fn new(database: Database, handlers: HandlerRegistry, config: OutboxConfig) -> Self {
        let dal = DAL::new(database);
        let config = Arc::new(config);
        let invoker = Arc::new(DeliveryInvoker::new(handlers, config.kill_switch().clone()));
        Self {
            drainer: Drainer::new(dal.clone(), invoker, config.clone()),
            dal,
            config,
        }
    }

    pub fn dal(&self) -> &DAL {
        &self.dal
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// Inserts a message in its own transaction and, for
    /// [`FlushMode::Immediate`], drains its shard up to the new message.
    ///
    /// Validation and insert failures are returned; drain failures are
    /// logged and left to the background sweep.
    pub async fn enqueue(
        &self,
        message: NewOutboxMessage,
        flush: FlushMode,
    ) -> Result<OutboxMessage, OutboxError> {
        let inserted = self.dal.outbox().insert(message).await?;
        if flush == FlushMode::Immediate {
            self.flush_shard(&inserted.shard_key()).await;
        }
        Ok(inserted)
    }

    /// Post-commit hook for an [`OutboxContext`].
    ///
    /// Drains every shard the context wrote to when its flush mode is
    /// [`FlushMode::Immediate`]. Returns the reports of successful drains.
    pub async fn flush_context(&self, context: OutboxContext) -> Vec<DrainReport> {
        if context.flush == FlushMode::Deferred {
            return Vec::new();
        }
        let mut reports = Vec::with_capacity(context.shards.len());
        for key in &context.shards {
            if let Some(report) = self.flush_shard(key).await {
                reports.push(report);
            }
        }
        reports
    }

    async fn flush_shard(&self, key: &ShardKey) -> Option<DrainReport> {
        match self.drainer.drain_shard(key, false).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Synchronous drain of shard {} failed: {}", key, e);
                None
            }
        }
    }

    /// Drains a shard. See [`DrainReport`] for how a pass ends.
    ///
    /// `flush_all = false` bounds the pass at the shard's latest id when the
    /// call starts; `true` drains until the shard is empty.
    pub async fn drain_shard(
        &self,
        key: &ShardKey,
        flush_all: bool,
    ) -> Result<DrainReport, OutboxError> {
        self.drainer.drain_shard(key, flush_all).await
    }

    /// Reserves the oldest due message of a shard, pushing the whole shard's
    /// schedule forward. `None` when nothing is due or the shard is locked.
    pub async fn prepare_next_from_shard(
        &self,
        key: &ShardKey,
    ) -> Result<Option<OutboxMessage>, OutboxError> {
        self.dal.outbox().prepare_next_from_shard(key).await
    }

    /// Reserves a shard for [`Outbox::drain_reserved`]. `None` when nothing
    /// is due or the shard is locked.
    pub async fn reserve_shard(
        &self,
        key: &ShardKey,
    ) -> Result<Option<ShardReservation>, OutboxError> {
        self.dal.outbox().reserve_shard(key).await
    }

    /// Drains a reserved shard until it is empty, claiming the rows the
    /// reservation pushed forward along with any that are due.
    pub async fn drain_reserved(
        &self,
        reservation: &ShardReservation,
    ) -> Result<DrainReport, OutboxError> {
        self.drainer
            .drain_reserved(&reservation.shard_key(), reservation.stamp)
            .await
    }

    /// Shards with due messages whose ids lie in `[low, high)`.
    pub async fn find_scheduled_shards(
        &self,
        low: i64,
        high: i64,
    ) -> Result<Vec<ScheduledShard>, OutboxError> {
        self.dal.outbox().find_scheduled_shards(low, high).await
    }

    /// The `limit` deepest shards.
    pub async fn shard_depths(&self, limit: usize) -> Result<Vec<ShardDepth>, OutboxError> {
        self.dal.outbox().shard_depths(limit).await
    }

    pub async fn count_pending(&self) -> Result<i64, OutboxError> {
        self.dal.outbox().count_pending().await
    }

    pub async fn messages_in_shard(&self, key: &ShardKey) -> Result<Vec<OutboxMessage>, OutboxError> {
        self.dal.outbox().messages_in_shard(key).await
    }

    /// Makes a backed-off shard eligible again immediately.
    pub async fn reset_shard_schedule(&self, key: &ShardKey) -> Result<usize, OutboxError> {
        self.dal.outbox().reset_shard_schedule(key).await
    }
}
