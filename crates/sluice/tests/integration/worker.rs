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

//! Background sweep and worker lifecycle.

use std::time::Duration;

use crate::fixtures::{registry_for, Recorder, TestDatabase};
use serial_test::serial;
use sluice::{FlushMode, NewOutboxMessage, OutboxCategory, OutboxConfig, OutboxWorker, ShardScope};
use tokio::sync::watch;

#[tokio::test(flavor = "multi_thread")]
async fn test_sweep_covers_every_id_partition() {
    let db = TestDatabase::new().await;
    let recorder = Recorder::new();
    let config = OutboxConfig::builder()
        .id_partitions(3)
        .max_concurrent_shards(3)
        .build();
    let worker = OutboxWorker::new(db.outbox(registry_for(&recorder), config));

    // two messages per shard, so most partitions see a shard again
    for round in 0..2 {
        for shard in 1..=7 {
            worker
                .outbox()
                .enqueue(
                    NewOutboxMessage::for_category(OutboxCategory::UserUpdate, shard, round),
                    FlushMode::Deferred,
                )
                .await
                .unwrap();
        }
    }

    let shards = worker.due_shards().await.unwrap();
    assert_eq!(shards.len(), 7);

    let report = worker.sweep_once().await.unwrap();
    assert_eq!(report.shards_found, 7);
    assert_eq!(report.shards_drained, 7);
    assert_eq!(report.delivered, 14);
    assert!(report.did_work());
    assert_eq!(worker.outbox().count_pending().await.unwrap(), 0);

    let idle = worker.sweep_once().await.unwrap();
    assert_eq!(idle.shards_found, 0);
    assert!(!idle.did_work());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sweep_drains_every_group_of_a_reserved_webhook_shard() {
    let db = TestDatabase::new().await;
    let recorder = Recorder::new();
    let worker = OutboxWorker::new(db.outbox(registry_for(&recorder), OutboxConfig::default()));

    for object in 1..=3 {
        worker
            .outbox()
            .enqueue(
                NewOutboxMessage::for_category(OutboxCategory::WebhookProxy, 9, object),
                FlushMode::Deferred,
            )
            .await
            .unwrap();
    }

    let report = worker.sweep_once().await.unwrap();
    assert_eq!(report.shards_drained, 1);
    assert_eq!(report.delivered, 3);
    assert_eq!(recorder.count(), 3);
    assert_eq!(worker.outbox().count_pending().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sweep_isolates_failing_shards() {
    let db = TestDatabase::new().await;
    let recorder = Recorder::new();
    let failing = Recorder::failing();
    let handlers = sluice::HandlerRegistry::builder()
        .register_arc(OutboxCategory::OrganizationUpdate, recorder.clone())
        .register_arc(OutboxCategory::TeamUpdate, failing.clone())
        .build();
    let worker = OutboxWorker::new(db.outbox(handlers, OutboxConfig::default()));

    for shard in 1..=3 {
        worker
            .outbox()
            .enqueue(
                NewOutboxMessage::for_category(OutboxCategory::OrganizationUpdate, shard, 1),
                FlushMode::Deferred,
            )
            .await
            .unwrap();
    }
    worker
        .outbox()
        .enqueue(
            NewOutboxMessage::for_category(OutboxCategory::TeamUpdate, 1, 1),
            FlushMode::Deferred,
        )
        .await
        .unwrap();

    let report = worker.sweep_once().await.unwrap();
    assert_eq!(report.shards_found, 4);
    assert_eq!(report.shards_failed, 1);
    assert_eq!(report.delivered, 3);
    assert_eq!(recorder.count(), 3);

    let remaining = worker.outbox().shard_depths(10).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].key.scope, ShardScope::Team);
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_worker_delivers_until_shutdown() {
    let db = TestDatabase::new().await;
    let recorder = Recorder::new();
    let config = OutboxConfig::builder()
        .poll_interval(Duration::from_millis(50))
        .build();
    let outbox = db.outbox(registry_for(&recorder), config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = OutboxWorker::new(outbox.clone()).spawn(shutdown_rx);

    outbox
        .enqueue(
            NewOutboxMessage::for_category(OutboxCategory::ProvisionOrganization, 1, 1),
            FlushMode::Deferred,
        )
        .await
        .unwrap();

    let delivered = tokio::time::timeout(Duration::from_secs(5), async {
        while recorder.count() == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(delivered.is_ok(), "worker never delivered the message");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop")
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_worker_stops_when_sender_is_dropped() {
    let db = TestDatabase::new().await;
    let config = OutboxConfig::builder()
        .poll_interval(Duration::from_secs(60))
        .build();
    let worker = OutboxWorker::new(db.outbox(registry_for(&Recorder::new()), config));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = worker.spawn(shutdown_rx);

    drop(shutdown_tx);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop")
        .unwrap();
}
