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

//! Draining a shard: reserve → coalesce → deliver → delete.
//!
//! Two variants, chosen per scope:
//!
//! - In-transaction: the head row and the representative stay locked while
//!   the handler runs, and the representative is deleted in the same
//!   transaction. Concurrent drainers of the shard see the lock and stop.
//! - Reservation: locking, rescheduling and superseded deletion commit
//!   before delivery. The handler runs outside any transaction and the
//!   representative is deleted afterwards in a short transaction. Only due
//!   rows can be claimed, and claiming stamps the shard's due rows with a
//!   future schedule, so a concurrent drainer finds nothing to do. The
//!   drainer holding the stamp keeps claiming the stamped rows.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::delivery::{DeliveryInvoker, DeliveryOutcome};
use super::scheduler;
use crate::config::OutboxConfig;
use crate::dal::outbox::{lock_next_group, LockedGroup};
use crate::dal::{with_connection, Eligibility, OutboxConnection, ReservationStamp, DAL};
use crate::error::OutboxError;
use crate::metrics;
use crate::models::{OutboxMessage, ShardKey};

/// Stages a message passes through while a shard is drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Idle,
    ShardLocked,
    CoalesceLocked,
    Delivering,
    Deleted,
    RetryScheduled,
}

impl DrainState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrainState::Idle => "idle",
            DrainState::ShardLocked => "shard_locked",
            DrainState::CoalesceLocked => "coalesce_locked",
            DrainState::Delivering => "delivering",
            DrainState::Deleted => "deleted",
            DrainState::RetryScheduled => "retry_scheduled",
        }
    }
}

impl fmt::Display for DrainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a drain pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStop {
    /// Nothing left up to the watermark.
    Empty,
    /// Another drainer holds the shard, or a delivered message could not be
    /// deleted and is left for a later pass.
    Contended,
    /// A handler failed; the shard is left for a later pass.
    DeliveryFailed,
}

/// Summary of one [`crate::Outbox::drain_shard`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub shard: ShardKey,
    /// Representatives handed to a handler (or without one) and deleted
    pub delivered: usize,
    /// Groups dropped by the kill switch
    pub skipped: usize,
    /// Superseded rows deleted without delivery
    pub superseded: usize,
    pub stop: DrainStop,
}

impl DrainReport {
    fn new(shard: ShardKey) -> Self {
        Self {
            shard,
            delivered: 0,
            skipped: 0,
            superseded: 0,
            stop: DrainStop::Empty,
        }
    }
}

#[derive(Debug)]
enum Step {
    Empty,
    Attempted {
        representative: OutboxMessage,
        oldest_added: NaiveDateTime,
        superseded: usize,
        outcome: DeliveryOutcome,
        /// False when a delivered representative could not be deleted
        settled: bool,
    },
}

impl Step {
    fn attempted(group: LockedGroup, outcome: DeliveryOutcome) -> Self {
        Self::finished(group, outcome, true)
    }

    fn finished(group: LockedGroup, outcome: DeliveryOutcome, settled: bool) -> Self {
        Step::Attempted {
            representative: group.representative,
            oldest_added: group.oldest_added,
            superseded: group.superseded,
            outcome,
            settled,
        }
    }
}

fn transition(key: &ShardKey, message_id: i64, state: DrainState) {
    debug!("Shard {} message {}: {}", key, message_id, state);
}

fn locked(key: &ShardKey, group: &LockedGroup) {
    transition(key, group.head_id, DrainState::ShardLocked);
    transition(key, group.representative.id, DrainState::CoalesceLocked);
}

/// Deletes a delivered representative or pushes back a failed one.
///
/// A failed representative that a sweep already pushed into the future keeps
/// its schedule so backoff does not compound within one pass.
fn settle<C: OutboxConnection>(
    conn: &mut C,
    representative: &OutboxMessage,
    outcome: &DeliveryOutcome,
) -> Result<DrainState, OutboxError> {
    if outcome.is_final() {
        conn.delete_ids(&[representative.id])?;
        Ok(DrainState::Deleted)
    } else {
        let now = scheduler::now();
        conn.reschedule_if_due(
            representative.id,
            now,
            representative.next_schedule(now),
            now,
        )?;
        Ok(DrainState::RetryScheduled)
    }
}

fn deliver_in_transaction<C: OutboxConnection>(
    conn: &mut C,
    key: &ShardKey,
    watermark: Option<i64>,
    delete_batch_size: usize,
    invoker: &DeliveryInvoker,
    runtime: &Handle,
    synchronous: bool,
) -> Result<Step, OutboxError> {
    conn.write_transaction(|conn| {
        let Some(group) =
            lock_next_group(conn, key, watermark, Eligibility::Any, delete_batch_size)?
        else {
            return Ok(Step::Empty);
        };
        locked(key, &group);
        let id = group.representative.id;

        transition(key, id, DrainState::Delivering);
        // runs on the pool's blocking thread, so blocking on the runtime is allowed
        let outcome = runtime.block_on(invoker.send(&group.representative, synchronous));

        let state = settle(conn, &group.representative, &outcome)?;
        transition(key, id, state);
        Ok(Step::attempted(group, outcome))
    })
}

/// Runs drain passes for one outbox.
#[derive(Debug, Clone)]
pub(crate) struct Drainer {
    dal: DAL,
    invoker: Arc<DeliveryInvoker>,
    config: Arc<OutboxConfig>,
}

impl Drainer {
    pub(crate) fn new(dal: DAL, invoker: Arc<DeliveryInvoker>, config: Arc<OutboxConfig>) -> Self {
        Self {
            dal,
            invoker,
            config,
        }
    }

    /// Drains a shard until it is empty, contended, or a delivery fails.
    ///
    /// With `flush_all` false only messages up to the shard's latest id at
    /// the start of the call are considered.
    pub(crate) async fn drain_shard(
        &self,
        key: &ShardKey,
        flush_all: bool,
    ) -> Result<DrainReport, OutboxError> {
        self.drain(key, flush_all, None).await
    }

    /// Drains a shard a sweep reserved under `stamp`, until it is empty.
    pub(crate) async fn drain_reserved(
        &self,
        key: &ShardKey,
        stamp: ReservationStamp,
    ) -> Result<DrainReport, OutboxError> {
        self.drain(key, true, Some(stamp)).await
    }

    async fn drain(
        &self,
        key: &ShardKey,
        flush_all: bool,
        mut held: Option<ReservationStamp>,
    ) -> Result<DrainReport, OutboxError> {
        let synchronous = !flush_all;
        let mut report = DrainReport::new(key.clone());

        let watermark = if flush_all {
            None
        } else {
            match self.dal.outbox().latest_id_in_shard(key).await? {
                Some(id) => Some(id),
                None => return Ok(report),
            }
        };

        let reservation = self.config.uses_reservation(key.scope);
        debug!("Shard {}: {}", key, DrainState::Idle);

        loop {
            let step = if reservation {
                self.reservation_step(key, watermark, &mut held, synchronous)
                    .await
            } else {
                self.transaction_step(key, watermark, synchronous).await
            };

            match step {
                Ok(Step::Empty) => {
                    report.stop = DrainStop::Empty;
                    break;
                }
                Ok(Step::Attempted {
                    representative,
                    oldest_added,
                    superseded,
                    outcome,
                    settled,
                }) => {
                    report.superseded += superseded;
                    match outcome {
                        DeliveryOutcome::Delivered => {
                            report.delivered += 1;
                            let now = scheduler::now();
                            metrics::record_processed(
                                representative.category,
                                synchronous,
                                (now - oldest_added).to_std().unwrap_or_default(),
                                (now - representative.date_added).to_std().unwrap_or_default(),
                            );
                        }
                        DeliveryOutcome::Skipped => report.skipped += 1,
                        DeliveryOutcome::Failed(_) => {
                            report.stop = DrainStop::DeliveryFailed;
                            break;
                        }
                    }
                    if !settled {
                        // the row stays stamped; a later pass redelivers it
                        report.stop = DrainStop::Contended;
                        break;
                    }
                }
                Err(OutboxError::LockNotAvailable) => {
                    debug!("Shard {} is locked by another drainer", key);
                    metrics::record_contended(synchronous);
                    report.stop = DrainStop::Contended;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if report.delivered + report.skipped > 0 || report.stop == DrainStop::DeliveryFailed {
            info!(
                "Drained shard {}: {} delivered, {} skipped, {} superseded ({:?})",
                key, report.delivered, report.skipped, report.superseded, report.stop
            );
        }
        Ok(report)
    }

    async fn transaction_step(
        &self,
        key: &ShardKey,
        watermark: Option<i64>,
        synchronous: bool,
    ) -> Result<Step, OutboxError> {
        let shard = key.clone();
        let invoker = self.invoker.clone();
        let runtime = Handle::current();
        let delete_batch_size = self.config.delete_batch_size();

        with_connection!(self.dal.database, |conn| {
            deliver_in_transaction(
                conn,
                &shard,
                watermark,
                delete_batch_size,
                &invoker,
                &runtime,
                synchronous,
            )
        })
    }

    async fn reservation_step(
        &self,
        key: &ShardKey,
        watermark: Option<i64>,
        held: &mut Option<ReservationStamp>,
        synchronous: bool,
    ) -> Result<Step, OutboxError> {
        let outbox = self.dal.outbox();
        let Some((group, stamp)) = outbox
            .reserve_next_group(key, watermark, *held, self.config.delete_batch_size())
            .await?
        else {
            return Ok(Step::Empty);
        };
        *held = Some(stamp);
        locked(key, &group);
        let id = group.representative.id;

        transition(key, id, DrainState::Delivering);
        let outcome = self.invoker.send(&group.representative, synchronous).await;

        if !outcome.is_final() {
            // rescheduled when the group was reserved
            transition(key, id, DrainState::RetryScheduled);
            return Ok(Step::attempted(group, outcome));
        }
        match outbox.delete_message(id).await {
            Ok(_) => {
                transition(key, id, DrainState::Deleted);
                Ok(Step::attempted(group, outcome))
            }
            Err(e) => {
                warn!(
                    "Delivered message {} of shard {} could not be deleted: {}",
                    id, key, e
                );
                Ok(Step::finished(group, outcome, false))
            }
        }
    }
}
