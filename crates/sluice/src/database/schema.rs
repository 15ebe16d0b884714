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

//! Diesel table definition shared by both backends.
//!
//! PostgreSQL declares `id` as `BIGSERIAL` and SQLite as
//! `INTEGER PRIMARY KEY AUTOINCREMENT`; both load as `BigInt`.

diesel::table! {
    outbox_messages (id) {
        id -> BigInt,
        shard_scope -> SmallInt,
        shard_identifier -> BigInt,
        category -> SmallInt,
        object_identifier -> BigInt,
        payload -> Nullable<Text>,
        region_name -> Nullable<Text>,
        scheduled_from -> Timestamp,
        scheduled_for -> Timestamp,
        date_added -> Timestamp,
    }
}
