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

//! Error types for the outbox.
//!
//! Lock contention is modelled as [`OutboxError::LockNotAvailable`] rather than
//! a database error so callers can treat it as "no work right now".

use thiserror::Error;

use crate::models::{OutboxCategory, ShardScope};

/// Errors raised when a message is rejected before it is persisted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The category is not registered for the message's shard scope.
    #[error("category {category} is not registered for shard scope {scope}")]
    CategoryNotInScope {
        scope: ShardScope,
        category: OutboxCategory,
    },

    /// A stored shard scope code does not map to a known scope.
    #[error("unknown shard scope code: {0}")]
    UnknownScope(i16),

    /// A stored category code does not map to a known category.
    #[error("unknown outbox category code: {0}")]
    UnknownCategory(i16),

    /// A scope or category name could not be parsed.
    #[error("unknown {kind} name: '{name}'")]
    UnknownName { kind: &'static str, name: String },
}

/// Errors produced by outbox storage and drain operations.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// A non-blocking row lock could not be obtained because another drainer
    /// holds it.
    #[error("Lock not available")]
    LockNotAvailable,

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid payload for outbox message {id}: {source}")]
    Payload {
        id: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl OutboxError {
    /// Returns true when the error means another process is working the same rows.
    pub fn is_lock_not_available(&self) -> bool {
        matches!(self, OutboxError::LockNotAvailable)
    }

    /// Rewrites driver-level lock failures as [`OutboxError::LockNotAvailable`].
    pub(crate) fn classify_contention(self) -> Self {
        match self {
            OutboxError::Database(ref e) if is_lock_contention(e) => OutboxError::LockNotAvailable,
            other => other,
        }
    }
}

/// Classifies a driver error as lock contention.
///
/// PostgreSQL reports `NOWAIT` failures as "could not obtain lock on row";
/// SQLite reports a held write lock as "database is locked" (`SQLITE_BUSY`).
pub(crate) fn is_lock_contention(error: &diesel::result::Error) -> bool {
    match error {
        diesel::result::Error::DatabaseError(_, info) => {
            let message = info.message();
            message.contains("could not obtain lock")
                || message.contains("database is locked")
                || message.contains("database table is locked")
        }
        _ => false,
    }
}

/// Error returned by a delivery handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}
