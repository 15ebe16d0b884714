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

//! Storage rows for the outbox table.
//!
//! Enum columns are stored as `SMALLINT` codes and payloads as JSON text so
//! one row type serves both backends.

use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::database::schema::outbox_messages;
use crate::error::OutboxError;
use crate::models::{NewOutboxMessage, OutboxCategory, OutboxMessage, ShardScope};

#[derive(Debug, Clone, Queryable)]
pub struct OutboxRow {
    pub id: i64,
    pub shard_scope: i16,
    pub shard_identifier: i64,
    pub category: i16,
    pub object_identifier: i64,
    pub payload: Option<String>,
    pub region_name: Option<String>,
    pub scheduled_from: NaiveDateTime,
    pub scheduled_for: NaiveDateTime,
    pub date_added: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = outbox_messages)]
pub struct NewOutboxRow {
    pub shard_scope: i16,
    pub shard_identifier: i64,
    pub category: i16,
    pub object_identifier: i64,
    pub payload: Option<String>,
    pub region_name: Option<String>,
    pub scheduled_from: NaiveDateTime,
    pub scheduled_for: NaiveDateTime,
    pub date_added: NaiveDateTime,
}

impl NewOutboxRow {
    /// Encodes a message for insertion with a never-reserved schedule.
    pub fn encode(message: &NewOutboxMessage, now: NaiveDateTime) -> Result<Self, OutboxError> {
        let payload = message
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        Ok(Self {
            shard_scope: message.shard_scope.code(),
            shard_identifier: message.shard_identifier,
            category: message.category.code(),
            object_identifier: message.object_identifier,
            payload,
            region_name: message.region_name.clone(),
            scheduled_from: now,
            scheduled_for: crate::outbox::scheduler::the_past(),
            date_added: now,
        })
    }
}

impl TryFrom<OutboxRow> for OutboxMessage {
    type Error = OutboxError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let payload = row
            .payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|source| OutboxError::Payload { id: row.id, source })?;

        Ok(OutboxMessage {
            id: row.id,
            shard_scope: ShardScope::from_code(row.shard_scope)?,
            shard_identifier: row.shard_identifier,
            category: OutboxCategory::from_code(row.category)?,
            object_identifier: row.object_identifier,
            payload,
            region_name: row.region_name,
            scheduled_from: row.scheduled_from,
            scheduled_for: row.scheduled_for,
            date_added: row.date_added,
        })
    }
}
