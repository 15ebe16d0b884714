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

//! Background sweep.
//!
//! Each sweep splits the id range of the outbox into `id_partitions` ranges,
//! collects shards with due messages, and drains them with bounded
//! concurrency: reserve the shard (pushing its schedule forward), then drain
//! it until empty under that reservation. A shard whose drain fails never
//! stops the others.

use std::collections::HashSet;

use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::OutboxError;
use crate::models::ShardKey;
use crate::outbox::scheduler::id_partitions;
use crate::outbox::{DrainStop, Outbox};

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Distinct shards with due work
    pub shards_found: usize,
    /// Shards reserved and drained
    pub shards_drained: usize,
    /// Shards that another drainer held or that were no longer due
    pub shards_contended: usize,
    /// Shards whose pass ended on a handler failure
    pub shards_failed: usize,
    /// Shards whose drain returned an error
    pub shard_errors: usize,
    pub delivered: usize,
    pub skipped: usize,
    pub superseded: usize,
}

impl SweepReport {
    pub fn did_work(&self) -> bool {
        self.delivered + self.skipped + self.superseded > 0 || self.shards_failed > 0
    }
}

enum ShardSweep {
    NotReserved,
    Drained(crate::outbox::DrainReport),
    Failed(OutboxError),
}

/// Periodically drains due shards of an [`Outbox`].
#[derive(Debug, Clone)]
pub struct OutboxWorker {
    outbox: Outbox,
}

impl OutboxWorker {
    pub fn new(outbox: Outbox) -> Self {
        Self { outbox }
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Due shards across the whole table, in discovery order.
    pub async fn due_shards(&self) -> Result<Vec<ShardKey>, OutboxError> {
        let Some((low, high)) = self.outbox.dal().outbox().id_bounds().await? else {
            return Ok(Vec::new());
        };

        let mut seen = HashSet::new();
        let mut shards = Vec::new();
        for (start, end) in id_partitions(low, high, self.outbox.config().id_partitions()) {
            for scheduled in self.outbox.find_scheduled_shards(start, end).await? {
                if seen.insert(scheduled.key.clone()) {
                    shards.push(scheduled.key);
                }
            }
        }
        Ok(shards)
    }

    /// Runs a single sweep over every due shard.
    pub async fn sweep_once(&self) -> Result<SweepReport, OutboxError> {
        let shards = self.due_shards().await?;
        let mut report = SweepReport {
            shards_found: shards.len(),
            ..SweepReport::default()
        };
        if shards.is_empty() {
            return Ok(report);
        }

        let outcomes: Vec<(ShardKey, ShardSweep)> = stream::iter(shards)
            .map(|key| async move {
                let outcome = self.sweep_shard(&key).await;
                (key, outcome)
            })
            .buffer_unordered(self.outbox.config().max_concurrent_shards())
            .collect()
            .await;

        for (key, outcome) in outcomes {
            match outcome {
                ShardSweep::NotReserved => report.shards_contended += 1,
                ShardSweep::Drained(drain) => {
                    report.shards_drained += 1;
                    report.delivered += drain.delivered;
                    report.skipped += drain.skipped;
                    report.superseded += drain.superseded;
                    match drain.stop {
                        DrainStop::DeliveryFailed => report.shards_failed += 1,
                        DrainStop::Contended => report.shards_contended += 1,
                        DrainStop::Empty => {}
                    }
                }
                ShardSweep::Failed(e) => {
                    error!("Failed to drain shard {}: {}", key, e);
                    report.shard_errors += 1;
                }
            }
        }
        Ok(report)
    }

    async fn sweep_shard(&self, key: &ShardKey) -> ShardSweep {
        let reservation = match self.outbox.reserve_shard(key).await {
            Ok(Some(reservation)) => reservation,
            Ok(None) => return ShardSweep::NotReserved,
            Err(e) => return ShardSweep::Failed(e),
        };
        match self.outbox.drain_reserved(&reservation).await {
            Ok(report) => ShardSweep::Drained(report),
            Err(e) => ShardSweep::Failed(e),
        }
    }

    /// Sweeps every `poll_interval` until `shutdown` becomes true or its
    /// sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.outbox.config().poll_interval();
        info!("Outbox worker started (poll interval: {:?})", interval);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.sweep_once().await {
                Ok(report) if report.did_work() => info!(
                    "Outbox sweep: {} shard(s) drained, {} delivered, {} skipped, {} failed",
                    report.shards_drained, report.delivered, report.skipped, report.shards_failed
                ),
                Ok(report) => debug!("Outbox sweep found {} shard(s)", report.shards_found),
                Err(e) => warn!("Outbox sweep failed: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Outbox worker stopped");
    }

    /// Spawns [`OutboxWorker::run`] on the current runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
