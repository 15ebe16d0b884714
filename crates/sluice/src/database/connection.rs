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

//! Database connection management.
//!
//! The backend is picked at runtime from the connection string and both
//! backends sit behind [`AnyPool`], a pair of `deadpool-diesel` pools.
//!
//! SQLite has no row locks, so its pool holds a single connection and write
//! transactions take the database write lock up front. Connections carry no
//! busy timeout, so a second drainer fails immediately with "database is
//! locked", which the DAL maps to [`crate::OutboxError::LockNotAvailable`].
//! Producer writes raise the timeout for their own transaction only.

use deadpool_diesel::postgres::{Manager as PgManager, Pool as PgPool, Runtime as PgRuntime};
use deadpool_diesel::sqlite::{
    Manager as SqliteManager, Pool as SqlitePool, Runtime as SqliteRuntime,
};
use tracing::info;
use url::Url;

use crate::error::OutboxError;

/// Database backend, detected from the connection URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Postgres,
    Sqlite,
}

impl BackendType {
    /// Detects the backend from a connection URL, returning `None` when the
    /// scheme matches neither backend.
    pub fn try_from_url(url: &str) -> Option<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Some(BackendType::Postgres);
        }

        // sqlite:// prefix, file: URIs, paths and :memory:
        if url.starts_with("sqlite://")
            || url.starts_with("file:")
            || url.starts_with('/')
            || url.starts_with("./")
            || url.starts_with("../")
            || url == ":memory:"
            || url.ends_with(".db")
            || url.ends_with(".sqlite")
            || url.ends_with(".sqlite3")
        {
            return Some(BackendType::Sqlite);
        }

        None
    }

    /// Detects the backend from a connection URL.
    ///
    /// # Panics
    /// Panics if the URL scheme doesn't match any backend.
    pub fn from_url(url: &str) -> Self {
        Self::try_from_url(url).unwrap_or_else(|| {
            panic!(
                "Unable to detect database backend from URL '{}'. \
                 Expected postgres://, postgresql://, sqlite://, or a file path.",
                url
            )
        })
    }
}

/// Connection pool for whichever backend was detected.
#[derive(Clone)]
pub enum AnyPool {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl std::fmt::Debug for AnyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnyPool::Postgres(_) => write!(f, "AnyPool::Postgres(...)"),
            AnyPool::Sqlite(_) => write!(f, "AnyPool::Sqlite(...)"),
        }
    }
}

/// Shared handle to the outbox database.
///
/// `Database` is `Clone`; clones share the underlying pool.
#[derive(Clone, Debug)]
pub struct Database {
    pool: AnyPool,
    backend: BackendType,
}

impl Database {
    /// Creates a connection pool with automatic backend detection.
    ///
    /// # Panics
    ///
    /// Panics if the backend cannot be detected or the pool cannot be built.
    /// Use [`Database::try_new`] to handle these as errors.
    pub fn new(connection_string: &str, max_size: u32) -> Self {
        match Self::try_new(connection_string, max_size) {
            Ok(database) => database,
            Err(e) => panic!("Failed to create database connection pool: {}", e),
        }
    }

    /// Creates a connection pool, reporting invalid URLs and pool failures.
    ///
    /// `max_size` applies to PostgreSQL; SQLite always uses one connection.
    pub fn try_new(connection_string: &str, max_size: u32) -> Result<Self, OutboxError> {
        let backend =
            BackendType::try_from_url(connection_string).ok_or_else(|| {
                OutboxError::Configuration {
                    message: format!(
                        "unable to detect database backend from '{}'",
                        connection_string
                    ),
                }
            })?;

        match backend {
            BackendType::Postgres => {
                let url = Url::parse(connection_string).map_err(|e| {
                    OutboxError::Configuration {
                        message: format!("invalid PostgreSQL URL: {}", e),
                    }
                })?;
                let manager = PgManager::new(connection_string, PgRuntime::Tokio1);
                let pool = PgPool::builder(manager)
                    .max_size(max_size as usize)
                    .build()
                    .map_err(|e| OutboxError::ConnectionPool(e.to_string()))?;

                info!(
                    "PostgreSQL connection pool initialized (host: {}, size: {})",
                    url.host_str().unwrap_or("localhost"),
                    max_size
                );

                Ok(Self {
                    pool: AnyPool::Postgres(pool),
                    backend,
                })
            }
            BackendType::Sqlite => {
                let connection_url = Self::build_sqlite_url(connection_string);
                let manager = SqliteManager::new(connection_url, SqliteRuntime::Tokio1);
                let sqlite_pool_size = 1;
                let pool = SqlitePool::builder(manager)
                    .max_size(sqlite_pool_size)
                    .build()
                    .map_err(|e| OutboxError::ConnectionPool(e.to_string()))?;

                info!(
                    "SQLite connection pool initialized (size: {})",
                    sqlite_pool_size
                );

                Ok(Self {
                    pool: AnyPool::Sqlite(pool),
                    backend,
                })
            }
        }
    }

    pub fn backend(&self) -> BackendType {
        self.backend
    }

    /// Returns a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    fn build_sqlite_url(connection_string: &str) -> String {
        connection_string
            .strip_prefix("sqlite://")
            .unwrap_or(connection_string)
            .to_string()
    }

    /// Runs pending migrations for the detected backend.
    ///
    /// On SQLite this also switches the database file to WAL so readers do not
    /// block behind a draining writer.
    pub async fn run_migrations(&self) -> Result<(), OutboxError> {
        use diesel_migrations::MigrationHarness;

        match &self.pool {
            AnyPool::Postgres(pool) => {
                let conn = pool
                    .get()
                    .await
                    .map_err(|e| OutboxError::ConnectionPool(e.to_string()))?;
                conn.interact(|conn| {
                    conn.run_pending_migrations(super::POSTGRES_MIGRATIONS)
                        .map(|applied| applied.len())
                        .map_err(|e| e.to_string())
                })
                .await
                .map_err(|e| OutboxError::ConnectionPool(e.to_string()))?
                .map(|applied| info!("Applied {} PostgreSQL migration(s)", applied))
                .map_err(OutboxError::Migration)?;
            }
            AnyPool::Sqlite(pool) => {
                let conn = pool
                    .get()
                    .await
                    .map_err(|e| OutboxError::ConnectionPool(e.to_string()))?;
                conn.interact(|conn| {
                    use diesel::RunQueryDsl;

                    diesel::sql_query("PRAGMA journal_mode=WAL;")
                        .execute(conn)
                        .map_err(|e| e.to_string())?;
                    conn.run_pending_migrations(super::SQLITE_MIGRATIONS)
                        .map(|applied| applied.len())
                        .map_err(|e| e.to_string())
                })
                .await
                .map_err(|e| OutboxError::ConnectionPool(e.to_string()))?
                .map(|applied| info!("Applied {} SQLite migration(s)", applied))
                .map_err(OutboxError::Migration)?;
            }
        }
        Ok(())
    }
}
