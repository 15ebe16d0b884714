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

//! # Sluice
//!
//! A transactional outbox for PostgreSQL and SQLite.
//!
//! Producers write outbox messages in the same transaction as their own
//! state changes. Drainers later deliver them to per-category handlers with
//! at-least-once semantics, using only row locks and transactions for
//! coordination:
//!
//! - Messages are partitioned into shards by `(region, scope, identifier)`
//!   and drained in id order within a shard.
//! - Messages with the same category and object within a shard coalesce:
//!   only the newest payload is delivered.
//! - A failed delivery is retried with capped exponential backoff
//!   (doubling from one second up to one hour).
//! - Locks are taken with `NOWAIT`; a drainer that loses a race sees "no
//!   work" instead of waiting.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use sluice::{handler_fn, Database, FlushMode, HandlerRegistry, NewOutboxMessage, Outbox,
//!              OutboxCategory, OutboxConfig, OutboxWorker};
//!
//! let database = Database::new("postgres://localhost/app", 10);
//! database.run_migrations().await?;
//!
//! let handlers = HandlerRegistry::builder()
//!     .register(OutboxCategory::OrganizationUpdate, handler_fn(|message| async move {
//!         replicate(message.object_identifier, message.payload).await
//!     }))
//!     .build();
//!
//! let outbox = Outbox::new(database, handlers, OutboxConfig::default());
//! outbox
//!     .enqueue(NewOutboxMessage::for_category(OutboxCategory::OrganizationUpdate, 1, 1),
//!              FlushMode::Immediate)
//!     .await?;
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let worker = OutboxWorker::new(outbox.clone()).spawn(shutdown_rx);
//! ```

pub mod config;
pub mod dal;
pub mod database;
pub mod error;
pub mod metrics;
pub mod models;
pub mod outbox;
pub mod worker;

pub use config::{DisabledShards, KillSwitch, OutboxConfig, OutboxConfigBuilder};
pub use dal::{
    OutboxConnection, ReservationStamp, ScheduledShard, ShardDepth, ShardReservation, DAL,
};
pub use database::{AnyPool, BackendType, Database};
pub use error::{HandlerError, OutboxError, ValidationError};
pub use models::{CoalesceKey, NewOutboxMessage, OutboxCategory, OutboxMessage, ShardKey, ShardScope};
pub use outbox::{
    handler_fn, DeliveryOutcome, DrainReport, DrainState, DrainStop, FlushMode, HandlerRegistry,
    Outbox, OutboxContext, OutboxHandler,
};
pub use worker::{OutboxWorker, SweepReport};

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, or by `level` when
/// given. Does nothing if a global subscriber is already set.
pub fn init_logging(level: Option<Level>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level.as_str().to_lowercase()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
