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

//! Data access layer.
//!
//! Queries are written once against [`OutboxConnection`] and run on a pooled
//! connection of whichever backend the [`Database`] detected. Each call
//! checks a connection out of the pool and runs the synchronous diesel code
//! through `interact`.

pub mod connection;
pub mod models;
pub mod outbox;

pub use connection::{
    Eligibility, OutboxConnection, ReservationStamp, ScheduledShard, ShardDepth,
    WRITE_WAIT_TIMEOUT,
};
pub use models::{NewOutboxRow, OutboxRow};
pub use outbox::{OutboxDAL, ShardReservation};

use crate::database::{AnyPool, BackendType, Database};

/// Runs `$body` on a pooled connection of either backend.
///
/// The body is expanded once per backend with `$conn` bound to
/// `&mut PgConnection` or `&mut SqliteConnection`, so it must only use
/// [`OutboxConnection`] methods. It must evaluate to
/// `Result<T, OutboxError>` and captures by move.
macro_rules! with_connection {
    ($database:expr, |$conn:ident| $body:expr) => {
        match $database.pool() {
            $crate::database::AnyPool::Postgres(pool) => {
                let object = pool
                    .get()
                    .await
                    .map_err(|e| $crate::error::OutboxError::ConnectionPool(e.to_string()))?;
                object
                    .interact(move |$conn: &mut diesel::PgConnection| $body)
                    .await
                    .map_err(|e| $crate::error::OutboxError::ConnectionPool(e.to_string()))?
            }
            $crate::database::AnyPool::Sqlite(pool) => {
                let object = pool
                    .get()
                    .await
                    .map_err(|e| $crate::error::OutboxError::ConnectionPool(e.to_string()))?;
                object
                    .interact(move |$conn: &mut diesel::SqliteConnection| $body)
                    .await
                    .map_err(|e| $crate::error::OutboxError::ConnectionPool(e.to_string()))?
            }
        }
    };
}

pub(crate) use with_connection;

/// Entry point to outbox storage operations.
///
/// `DAL` is `Clone`; clones share the database pool.
#[derive(Clone, Debug)]
pub struct DAL {
    pub database: Database,
}

impl DAL {
    pub fn new(database: Database) -> Self {
        DAL { database }
    }

    pub fn backend(&self) -> BackendType {
        self.database.backend()
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn pool(&self) -> AnyPool {
        self.database.pool()
    }

    /// Returns an outbox DAL for message operations.
    pub fn outbox(&self) -> OutboxDAL<'_> {
        OutboxDAL::new(self)
    }
}
