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

//! Backend-specific outbox queries.
//!
//! [`OutboxConnection`] is implemented for `PgConnection` and
//! `SqliteConnection`. Most queries are shared and expanded per backend by
//! `shared_queries!`; only row locking and write transactions differ:
//!
//! - PostgreSQL locks rows with `SELECT ... FOR UPDATE NOWAIT`.
//! - SQLite has no row locks, so write transactions are `BEGIN IMMEDIATE`
//!   and take the database write lock before the first read.
//!
//! Drain-side transactions fail fast on contention. Producer and operator
//! writes go through [`OutboxConnection::blocking_write_transaction`], which
//! waits for a held lock instead.

use std::time::Duration;

use chrono::NaiveDateTime;
use diesel::dsl::{count, max, min};
use diesel::prelude::*;
use diesel::{PgConnection, SqliteConnection};

use super::models::{NewOutboxRow, OutboxRow};
use crate::database::schema::outbox_messages;
use crate::error::OutboxError;
use crate::models::{CoalesceKey, ShardKey, ShardScope};

/// How long a blocking write waits for the SQLite write lock.
pub const WRITE_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// A shard with due work, as found by the scheduler query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledShard {
    pub key: ShardKey,
    /// Earliest `scheduled_for` among the shard's due messages
    pub earliest_scheduled_for: NaiveDateTime,
    /// Highest id among the shard's due messages
    pub latest_id: i64,
}

/// The schedule a drainer writes onto the rows it reserves.
///
/// Rows still carrying the stamp are not due, so other drainers skip them,
/// while the drainer holding the stamp can keep claiming them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationStamp {
    pub scheduled_from: NaiveDateTime,
    pub scheduled_for: NaiveDateTime,
}

/// Which rows of a shard a drain may claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Every row, whatever its schedule.
    Any,
    /// Rows due at the given instant.
    DueBy(NaiveDateTime),
    /// Rows due at `now` plus rows reserved under `stamp`.
    DueOrHeld {
        now: NaiveDateTime,
        stamp: ReservationStamp,
    },
}

/// Number of pending messages in a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDepth {
    pub key: ShardKey,
    pub depth: i64,
}

/// Outbox queries available on a synchronous diesel connection.
///
/// Producers use this through [`crate::OutboxContext::enqueue`] to write
/// messages inside their own transaction.
pub trait OutboxConnection: Connection + Send + 'static {
    /// Runs `f` in a write transaction, reporting lock contention as
    /// [`OutboxError::LockNotAvailable`].
    fn write_transaction<T, F>(&mut self, f: F) -> Result<T, OutboxError>
    where
        F: FnOnce(&mut Self) -> Result<T, OutboxError>;

    /// Runs `f` in a write transaction that waits up to
    /// [`WRITE_WAIT_TIMEOUT`] for a lock held by a drainer.
    fn blocking_write_transaction<T, F>(&mut self, f: F) -> Result<T, OutboxError>
    where
        F: FnOnce(&mut Self) -> Result<T, OutboxError>;

    /// Locks a single row without waiting. Returns `None` if the row is gone.
    fn lock_row(&mut self, id: i64) -> Result<Option<OutboxRow>, OutboxError>;

    /// Locks every row of a shard without waiting.
    fn lock_shard(&mut self, key: &ShardKey) -> Result<(), OutboxError>;

    fn insert_message(&mut self, row: &NewOutboxRow) -> Result<OutboxRow, OutboxError>;

    /// Head of the shard in id order among the eligible rows, optionally
    /// bounded by a watermark id.
    fn next_in_shard(
        &mut self,
        key: &ShardKey,
        watermark: Option<i64>,
        eligibility: Eligibility,
    ) -> Result<Option<OutboxRow>, OutboxError>;

    /// Highest id currently in the shard.
    fn latest_in_shard(&mut self, key: &ShardKey) -> Result<Option<i64>, OutboxError>;

    /// `(id, date_added)` of every message in a coalesce group, oldest first.
    fn coalesced_ids(
        &mut self,
        key: &CoalesceKey,
    ) -> Result<Vec<(i64, NaiveDateTime)>, OutboxError>;

    fn load_message(&mut self, id: i64) -> Result<Option<OutboxRow>, OutboxError>;

    fn delete_ids(&mut self, ids: &[i64]) -> Result<usize, OutboxError>;

    /// Sets the schedule of every message in the shard, or only of those
    /// due by `due_by` when given. `up_to` bounds the ids touched.
    fn reschedule_shard(
        &mut self,
        key: &ShardKey,
        scheduled_for: NaiveDateTime,
        scheduled_from: NaiveDateTime,
        due_by: Option<NaiveDateTime>,
        up_to: Option<i64>,
    ) -> Result<usize, OutboxError>;

    /// Sets the schedule of one message if it is still due at `now`.
    fn reschedule_if_due(
        &mut self,
        id: i64,
        now: NaiveDateTime,
        scheduled_for: NaiveDateTime,
        scheduled_from: NaiveDateTime,
    ) -> Result<usize, OutboxError>;

    /// Shards with a message due at `now` whose id lies in `[low, high)`,
    /// ordered by (earliest `scheduled_for`, highest id).
    fn scheduled_shards(
        &mut self,
        low: i64,
        high: i64,
        now: NaiveDateTime,
    ) -> Result<Vec<ScheduledShard>, OutboxError>;

    /// Pending message counts per shard, deepest first.
    fn shard_depths(&mut self) -> Result<Vec<ShardDepth>, OutboxError>;

    /// Lowest and highest id in the table.
    fn id_bounds(&mut self) -> Result<Option<(i64, i64)>, OutboxError>;

    fn count_pending(&mut self) -> Result<i64, OutboxError>;

    /// All messages in a shard in id order.
    fn shard_messages(&mut self, key: &ShardKey) -> Result<Vec<OutboxRow>, OutboxError>;
}

/// Applies the shard key filter to `$source` and evaluates `$body` with the
/// filtered query bound to `$q`. The region branch changes the query type, so
/// the body is expanded once per branch.
macro_rules! with_shard_filter {
    ($source:expr, $key:expr, |$q:ident| $body:expr) => {{
        let key: &ShardKey = $key;
        match key.region_name.as_deref() {
            Some(region) => {
                let $q = $source
                    .filter(outbox_messages::region_name.eq(region))
                    .filter(outbox_messages::shard_scope.eq(key.scope.code()))
                    .filter(outbox_messages::shard_identifier.eq(key.shard_identifier));
                $body
            }
            None => {
                let $q = $source
                    .filter(outbox_messages::region_name.is_null())
                    .filter(outbox_messages::shard_scope.eq(key.scope.code()))
                    .filter(outbox_messages::shard_identifier.eq(key.shard_identifier));
                $body
            }
        }
    }};
}

fn shard_key_from_columns(
    region_name: Option<String>,
    scope: i16,
    shard_identifier: i64,
) -> Result<ShardKey, OutboxError> {
    Ok(ShardKey {
        region_name,
        scope: ShardScope::from_code(scope)?,
        shard_identifier,
    })
}

type ShardAggregate = (Option<String>, i16, i64, Option<NaiveDateTime>, Option<i64>);

fn collect_scheduled(rows: Vec<ShardAggregate>) -> Result<Vec<ScheduledShard>, OutboxError> {
    let mut shards = Vec::with_capacity(rows.len());
    for (region_name, scope, shard_identifier, earliest, latest_id) in rows {
        if let (Some(earliest_scheduled_for), Some(latest_id)) = (earliest, latest_id) {
            shards.push(ScheduledShard {
                key: shard_key_from_columns(region_name, scope, shard_identifier)?,
                earliest_scheduled_for,
                latest_id,
            });
        }
    }
    shards.sort_by(|a, b| {
        a.earliest_scheduled_for
            .cmp(&b.earliest_scheduled_for)
            .then(a.latest_id.cmp(&b.latest_id))
    });
    Ok(shards)
}

fn collect_depths(rows: Vec<(Option<String>, i16, i64, i64)>) -> Result<Vec<ShardDepth>, OutboxError> {
    let mut depths = rows
        .into_iter()
        .map(|(region_name, scope, shard_identifier, depth)| {
            Ok(ShardDepth {
                key: shard_key_from_columns(region_name, scope, shard_identifier)?,
                depth,
            })
        })
        .collect::<Result<Vec<_>, OutboxError>>()?;
    depths.sort_by(|a, b| b.depth.cmp(&a.depth).then_with(|| a.key.cmp(&b.key)));
    Ok(depths)
}

macro_rules! shared_queries {
    () => {
        fn insert_message(&mut self, row: &NewOutboxRow) -> Result<OutboxRow, OutboxError> {
            Ok(diesel::insert_into(outbox_messages::table)
                .values(row)
                .get_result(self)?)
        }

        fn next_in_shard(
            &mut self,
            key: &ShardKey,
            watermark: Option<i64>,
            eligibility: Eligibility,
        ) -> Result<Option<OutboxRow>, OutboxError> {
            let upper = watermark.unwrap_or(i64::MAX);
            Ok(with_shard_filter!(outbox_messages::table, key, |q| {
                let q = q
                    .filter(outbox_messages::id.le(upper))
                    .order(outbox_messages::id.asc());
                match eligibility {
                    Eligibility::Any => q.first::<OutboxRow>(self).optional()?,
                    Eligibility::DueBy(now) => q
                        .filter(outbox_messages::scheduled_for.le(now))
                        .first::<OutboxRow>(self)
                        .optional()?,
                    Eligibility::DueOrHeld { now, stamp } => {
                        let held = outbox_messages::scheduled_from
                            .eq(stamp.scheduled_from)
                            .and(outbox_messages::scheduled_for.eq(stamp.scheduled_for));
                        q.filter(outbox_messages::scheduled_for.le(now).or(held))
                            .first::<OutboxRow>(self)
                            .optional()?
                    }
                }
            }))
        }

        fn latest_in_shard(&mut self, key: &ShardKey) -> Result<Option<i64>, OutboxError> {
            Ok(with_shard_filter!(outbox_messages::table, key, |q| {
                q.select(max(outbox_messages::id))
                    .get_result::<Option<i64>>(self)?
            }))
        }

        fn coalesced_ids(
            &mut self,
            key: &CoalesceKey,
        ) -> Result<Vec<(i64, NaiveDateTime)>, OutboxError> {
            Ok(with_shard_filter!(outbox_messages::table, &key.shard, |q| {
                q.filter(outbox_messages::category.eq(key.category.code()))
                    .filter(outbox_messages::object_identifier.eq(key.object_identifier))
                    .order(outbox_messages::id.asc())
                    .select((outbox_messages::id, outbox_messages::date_added))
                    .load::<(i64, NaiveDateTime)>(self)?
            }))
        }

        fn load_message(&mut self, id: i64) -> Result<Option<OutboxRow>, OutboxError> {
            Ok(outbox_messages::table
                .find(id)
                .first::<OutboxRow>(self)
                .optional()?)
        }

        fn delete_ids(&mut self, ids: &[i64]) -> Result<usize, OutboxError> {
            if ids.is_empty() {
                return Ok(0);
            }
            Ok(diesel::delete(
                outbox_messages::table.filter(outbox_messages::id.eq_any(ids.to_vec())),
            )
            .execute(self)?)
        }

        fn reschedule_shard(
            &mut self,
            key: &ShardKey,
            scheduled_for: NaiveDateTime,
            scheduled_from: NaiveDateTime,
            due_by: Option<NaiveDateTime>,
            up_to: Option<i64>,
        ) -> Result<usize, OutboxError> {
            let changes = (
                outbox_messages::scheduled_for.eq(scheduled_for),
                outbox_messages::scheduled_from.eq(scheduled_from),
            );
            let upper = up_to.unwrap_or(i64::MAX);
            Ok(with_shard_filter!(outbox_messages::table, key, |q| {
                let q = q.filter(outbox_messages::id.le(upper));
                match due_by {
                    Some(now) => diesel::update(q.filter(outbox_messages::scheduled_for.le(now)))
                        .set(changes)
                        .execute(self)?,
                    None => diesel::update(q).set(changes).execute(self)?,
                }
            }))
        }

        fn reschedule_if_due(
            &mut self,
            id: i64,
            now: NaiveDateTime,
            scheduled_for: NaiveDateTime,
            scheduled_from: NaiveDateTime,
        ) -> Result<usize, OutboxError> {
            Ok(diesel::update(
                outbox_messages::table
                    .filter(outbox_messages::id.eq(id))
                    .filter(outbox_messages::scheduled_for.le(now)),
            )
            .set((
                outbox_messages::scheduled_for.eq(scheduled_for),
                outbox_messages::scheduled_from.eq(scheduled_from),
            ))
            .execute(self)?)
        }

        fn scheduled_shards(
            &mut self,
            low: i64,
            high: i64,
            now: NaiveDateTime,
        ) -> Result<Vec<ScheduledShard>, OutboxError> {
            let rows = outbox_messages::table
                .filter(outbox_messages::id.ge(low))
                .filter(outbox_messages::id.lt(high))
                .filter(outbox_messages::scheduled_for.le(now))
                .group_by((
                    outbox_messages::region_name,
                    outbox_messages::shard_scope,
                    outbox_messages::shard_identifier,
                ))
                .select((
                    outbox_messages::region_name,
                    outbox_messages::shard_scope,
                    outbox_messages::shard_identifier,
                    min(outbox_messages::scheduled_for),
                    max(outbox_messages::id),
                ))
                .load::<ShardAggregate>(self)?;
            collect_scheduled(rows)
        }

        fn shard_depths(&mut self) -> Result<Vec<ShardDepth>, OutboxError> {
            let rows = outbox_messages::table
                .group_by((
                    outbox_messages::region_name,
                    outbox_messages::shard_scope,
                    outbox_messages::shard_identifier,
                ))
                .select((
                    outbox_messages::region_name,
                    outbox_messages::shard_scope,
                    outbox_messages::shard_identifier,
                    count(outbox_messages::id),
                ))
                .load::<(Option<String>, i16, i64, i64)>(self)?;
            collect_depths(rows)
        }

        fn id_bounds(&mut self) -> Result<Option<(i64, i64)>, OutboxError> {
            let (low, high) = outbox_messages::table
                .select((min(outbox_messages::id), max(outbox_messages::id)))
                .get_result::<(Option<i64>, Option<i64>)>(self)?;
            Ok(low.zip(high))
        }

        fn count_pending(&mut self) -> Result<i64, OutboxError> {
            Ok(outbox_messages::table
                .count()
                .get_result::<i64>(self)?)
        }

        fn shard_messages(&mut self, key: &ShardKey) -> Result<Vec<OutboxRow>, OutboxError> {
            Ok(with_shard_filter!(outbox_messages::table, key, |q| {
                q.order(outbox_messages::id.asc()).load::<OutboxRow>(self)?
            }))
        }
    };
}

impl OutboxConnection for PgConnection {
    fn write_transaction<T, F>(&mut self, f: F) -> Result<T, OutboxError>
    where
        F: FnOnce(&mut Self) -> Result<T, OutboxError>,
    {
        self.transaction(f).map_err(OutboxError::classify_contention)
    }

    fn blocking_write_transaction<T, F>(&mut self, f: F) -> Result<T, OutboxError>
    where
        F: FnOnce(&mut Self) -> Result<T, OutboxError>,
    {
        // plain statements wait on row locks; only NOWAIT fails fast
        self.transaction(f)
    }

    fn lock_row(&mut self, id: i64) -> Result<Option<OutboxRow>, OutboxError> {
        outbox_messages::table
            .find(id)
            .for_update()
            .no_wait()
            .get_result::<OutboxRow>(self)
            .optional()
            .map_err(|e| OutboxError::from(e).classify_contention())
    }

    fn lock_shard(&mut self, key: &ShardKey) -> Result<(), OutboxError> {
        with_shard_filter!(outbox_messages::table, key, |q| {
            q.select(outbox_messages::id)
                .for_update()
                .no_wait()
                .load::<i64>(self)
        })
        .map(|_| ())
        .map_err(|e| OutboxError::from(e).classify_contention())
    }

    shared_queries!();
}

fn set_busy_timeout(conn: &mut SqliteConnection, timeout: Duration) -> Result<(), OutboxError> {
    diesel::sql_query(format!("PRAGMA busy_timeout = {}", timeout.as_millis())).execute(conn)?;
    Ok(())
}

impl OutboxConnection for SqliteConnection {
    fn write_transaction<T, F>(&mut self, f: F) -> Result<T, OutboxError>
    where
        F: FnOnce(&mut Self) -> Result<T, OutboxError>,
    {
        self.immediate_transaction(f)
            .map_err(OutboxError::classify_contention)
    }

    fn blocking_write_transaction<T, F>(&mut self, f: F) -> Result<T, OutboxError>
    where
        F: FnOnce(&mut Self) -> Result<T, OutboxError>,
    {
        set_busy_timeout(self, WRITE_WAIT_TIMEOUT)?;
        let result = self
            .immediate_transaction(f)
            .map_err(OutboxError::classify_contention);
        // drain transactions on this connection must keep failing fast
        let reset = set_busy_timeout(self, Duration::ZERO);
        let value = result?;
        reset?;
        Ok(value)
    }

    fn lock_row(&mut self, id: i64) -> Result<Option<OutboxRow>, OutboxError> {
        // the immediate transaction already holds the write lock
        self.load_message(id)
    }

    fn lock_shard(&mut self, _key: &ShardKey) -> Result<(), OutboxError> {
        Ok(())
    }

    shared_queries!();
}
