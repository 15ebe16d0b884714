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

//! Implementations of the sluicectl subcommands.

pub mod depths;
pub mod migrate;
pub mod reset_shard;
pub mod scheduled;

use anyhow::{Context, Result};
use sluice::{Database, OutboxConfig, DAL};

/// Opens the database with the configured pool size.
pub(crate) fn connect(database_url: &str, config: &OutboxConfig) -> Result<DAL> {
    let database = Database::try_new(database_url, config.db_pool_size())
        .context("Failed to connect to database")?;
    Ok(DAL::new(database))
}
