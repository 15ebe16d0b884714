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

//! Outbox DAL: enqueueing, reservation and operational queries.

use chrono::NaiveDateTime;
use tracing::debug;

use super::connection::{
    Eligibility, OutboxConnection, ReservationStamp, ScheduledShard, ShardDepth,
};
use super::models::NewOutboxRow;
use super::{with_connection, DAL};
use crate::error::OutboxError;
use crate::metrics;
use crate::models::{NewOutboxMessage, OutboxMessage, ShardKey};
use crate::outbox::coalesce::CoalescedGroup;
use crate::outbox::scheduler;

/// A shard reserved by a sweep.
///
/// Every row of the shard carries `stamp` until the reservation expires;
/// hand it to [`crate::Outbox::drain_reserved`] so the drain that follows
/// can claim those rows while other drainers cannot.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardReservation {
    /// The shard's oldest due message, as it was before rescheduling
    pub message: OutboxMessage,
    pub stamp: ReservationStamp,
}

impl ShardReservation {
    pub fn shard_key(&self) -> ShardKey {
        self.message.shard_key()
    }
}

/// A coalesce group whose representative is locked and whose superseded
/// rows have been deleted.
#[derive(Debug, Clone)]
pub(crate) struct LockedGroup {
    /// Id of the shard head the group was found from
    pub head_id: i64,
    pub representative: OutboxMessage,
    pub superseded: usize,
    /// `date_added` of the oldest message of the group
    pub oldest_added: NaiveDateTime,
}

/// Validates and inserts a message on the given connection.
///
/// Nothing is written when the category is not registered for the scope.
pub(crate) fn insert_message<C: OutboxConnection>(
    conn: &mut C,
    message: &NewOutboxMessage,
) -> Result<OutboxMessage, OutboxError> {
    message.validate()?;
    let row = NewOutboxRow::encode(message, scheduler::now())?;
    let inserted = OutboxMessage::try_from(conn.insert_message(&row)?)?;
    metrics::record_saved(inserted.category);
    Ok(inserted)
}

/// Locks the head of the shard and its coalesce group, then deletes the
/// group's superseded rows. Must run inside a write transaction.
///
/// The head is the lowest eligible id up to the watermark.
pub(crate) fn lock_next_group<C: OutboxConnection>(
    conn: &mut C,
    key: &ShardKey,
    watermark: Option<i64>,
    eligibility: Eligibility,
    delete_batch_size: usize,
) -> Result<Option<LockedGroup>, OutboxError> {
    loop {
        let Some(candidate) = conn.next_in_shard(key, watermark, eligibility)? else {
            return Ok(None);
        };
        let Some(head) = conn.lock_row(candidate.id)? else {
            // deleted between the scan and the lock
            continue;
        };
        let head = OutboxMessage::try_from(head)?;
        debug!("Locked head {} of shard {}", head.id, key);

        let members = conn.coalesced_ids(&head.coalesce_key())?;
        let Some(group) = CoalescedGroup::from_members(&members) else {
            continue;
        };

        let representative = if group.representative_id == head.id {
            head
        } else {
            match conn.lock_row(group.representative_id)? {
                Some(row) => OutboxMessage::try_from(row)?,
                None => continue,
            }
        };

        let mut deleted = 0;
        for batch in group.superseded_batches(delete_batch_size) {
            deleted += conn.delete_ids(batch)?;
        }
        debug!(
            "Locked coalesce group {} (representative {}, {} superseded)",
            representative.coalesce_key(),
            representative.id,
            deleted
        );

        return Ok(Some(LockedGroup {
            head_id: candidate.id,
            representative,
            superseded: deleted,
            oldest_added: group.oldest_added,
        }));
    }
}

fn prepare_shard<C: OutboxConnection>(
    conn: &mut C,
    key: &ShardKey,
) -> Result<Option<ShardReservation>, OutboxError> {
    conn.write_transaction(|conn| {
        let now = scheduler::now();
        loop {
            let Some(candidate) = conn.next_in_shard(key, None, Eligibility::DueBy(now))? else {
                return Ok(None);
            };
            conn.lock_shard(key)?;
            let Some(row) = conn.lock_row(candidate.id)? else {
                continue;
            };
            let message = OutboxMessage::try_from(row)?;
            let stamp = ReservationStamp {
                scheduled_from: now,
                scheduled_for: message.next_schedule(now),
            };
            let rescheduled =
                conn.reschedule_shard(key, stamp.scheduled_for, stamp.scheduled_from, None, None)?;
            debug!(
                "Reserved shard {} at message {}: {} row(s) rescheduled to {}",
                key, message.id, rescheduled, stamp.scheduled_for
            );
            return Ok(Some(ShardReservation { message, stamp }));
        }
    })
}

/// Claims the next group among due rows and rows already held under
/// `held`, then stamps the shard's due rows up to the watermark so no other
/// drainer can claim them while the group is delivered.
fn reserve_group<C: OutboxConnection>(
    conn: &mut C,
    key: &ShardKey,
    watermark: Option<i64>,
    held: Option<ReservationStamp>,
    delete_batch_size: usize,
) -> Result<Option<(LockedGroup, ReservationStamp)>, OutboxError> {
    conn.write_transaction(|conn| {
        let now = scheduler::now();
        let eligibility = match held {
            Some(stamp) => Eligibility::DueOrHeld { now, stamp },
            None => Eligibility::DueBy(now),
        };
        let Some(group) = lock_next_group(conn, key, watermark, eligibility, delete_batch_size)?
        else {
            return Ok(None);
        };
        let stamp = held.unwrap_or_else(|| ReservationStamp {
            scheduled_from: now,
            scheduled_for: group.representative.next_schedule(now),
        });
        conn.reschedule_shard(
            key,
            stamp.scheduled_for,
            stamp.scheduled_from,
            Some(now),
            watermark,
        )?;
        Ok(Some((group, stamp)))
    })
}

/// Data access layer for outbox messages.
#[derive(Clone)]
pub struct OutboxDAL<'a> {
    dal: &'a DAL,
}

impl<'a> OutboxDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Validates and inserts a message in its own transaction.
    pub async fn insert(&self, message: NewOutboxMessage) -> Result<OutboxMessage, OutboxError> {
        message.validate()?;
        with_connection!(self.dal.database, |conn| {
            conn.blocking_write_transaction(|conn| insert_message(conn, &message))
        })
    }

    /// Reserves the oldest due message of a shard and pushes the schedule of
    /// every message in the shard to that message's next retry instant.
    ///
    /// Returns `None` when nothing is due or another drainer holds the shard.
    pub async fn prepare_next_from_shard(
        &self,
        key: &ShardKey,
    ) -> Result<Option<OutboxMessage>, OutboxError> {
        Ok(self.reserve_shard(key).await?.map(|reservation| reservation.message))
    }

    /// Like [`OutboxDAL::prepare_next_from_shard`], also returning the
    /// schedule stamped on the shard.
    pub async fn reserve_shard(
        &self,
        key: &ShardKey,
    ) -> Result<Option<ShardReservation>, OutboxError> {
        let shard = key.clone();
        let result = with_connection!(self.dal.database, |conn| prepare_shard(conn, &shard));
        match result {
            Err(OutboxError::LockNotAvailable) => {
                debug!("Shard {} is being drained elsewhere", key);
                metrics::record_contended(false);
                Ok(None)
            }
            other => other,
        }
    }

    /// Locks the next coalesce group, stamps the shard's due rows and
    /// deletes superseded rows, committing before delivery.
    pub(crate) async fn reserve_next_group(
        &self,
        key: &ShardKey,
        watermark: Option<i64>,
        held: Option<ReservationStamp>,
        delete_batch_size: usize,
    ) -> Result<Option<(LockedGroup, ReservationStamp)>, OutboxError> {
        let shard = key.clone();
        with_connection!(self.dal.database, |conn| {
            reserve_group(conn, &shard, watermark, held, delete_batch_size)
        })
    }

    /// Deletes one message. Returns false if it was already gone.
    pub async fn delete_message(&self, id: i64) -> Result<bool, OutboxError> {
        with_connection!(self.dal.database, |conn| {
            conn.blocking_write_transaction(|conn| {
                conn.delete_ids(&[id]).map(|deleted| deleted > 0)
            })
        })
    }

    /// Highest message id in the shard.
    pub async fn latest_id_in_shard(&self, key: &ShardKey) -> Result<Option<i64>, OutboxError> {
        let shard = key.clone();
        with_connection!(self.dal.database, |conn| conn.latest_in_shard(&shard))
    }

    /// Shards with a due message whose id lies in `[low, high)`, earliest
    /// schedule first.
    pub async fn find_scheduled_shards(
        &self,
        low: i64,
        high: i64,
    ) -> Result<Vec<ScheduledShard>, OutboxError> {
        let now = scheduler::now();
        with_connection!(self.dal.database, |conn| conn.scheduled_shards(low, high, now))
    }

    /// The `limit` shards with the most pending messages.
    pub async fn shard_depths(&self, limit: usize) -> Result<Vec<ShardDepth>, OutboxError> {
        let mut depths = with_connection!(self.dal.database, |conn| conn.shard_depths())?;
        depths.truncate(limit);
        Ok(depths)
    }

    pub async fn id_bounds(&self) -> Result<Option<(i64, i64)>, OutboxError> {
        with_connection!(self.dal.database, |conn| conn.id_bounds())
    }

    pub async fn count_pending(&self) -> Result<i64, OutboxError> {
        with_connection!(self.dal.database, |conn| conn.count_pending())
    }

    /// Every message of a shard in id order.
    pub async fn messages_in_shard(&self, key: &ShardKey) -> Result<Vec<OutboxMessage>, OutboxError> {
        let shard = key.clone();
        let rows = with_connection!(self.dal.database, |conn| conn.shard_messages(&shard))?;
        rows.into_iter().map(OutboxMessage::try_from).collect()
    }

    /// Makes every message of a shard eligible immediately and restarts its
    /// backoff.
    pub async fn reset_shard_schedule(&self, key: &ShardKey) -> Result<usize, OutboxError> {
        let shard = key.clone();
        let now = scheduler::now();
        with_connection!(self.dal.database, |conn| {
            conn.blocking_write_transaction(|conn| {
                conn.reschedule_shard(&shard, scheduler::the_past(), now, None, None)
            })
        })
    }

    /// Overwrites the schedule of every message in a shard.
    pub async fn set_shard_schedule(
        &self,
        key: &ShardKey,
        scheduled_from: NaiveDateTime,
        scheduled_for: NaiveDateTime,
    ) -> Result<usize, OutboxError> {
        let shard = key.clone();
        with_connection!(self.dal.database, |conn| {
            conn.blocking_write_transaction(|conn| {
                conn.reschedule_shard(&shard, scheduled_for, scheduled_from, None, None)
            })
        })
    }
}
