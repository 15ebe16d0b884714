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

//! End-to-end scenarios across enqueue, drain and the background sweep.

use crate::fixtures::{registry_for, Recorder, TestDatabase};
use chrono::Duration;
use serde_json::json;
use sluice::outbox::scheduler;
use sluice::{
    DrainStop, FlushMode, NewOutboxMessage, OutboxCategory, OutboxConfig, OutboxWorker, ShardKey,
    ShardScope,
};

#[tokio::test(flavor = "multi_thread")]
async fn test_coalesced_and_distinct_keys_in_one_shard() {
    let db = TestDatabase::new().await;
    let recorder = Recorder::new();
    let outbox = db.outbox(registry_for(&recorder), OutboxConfig::default());

    let a = NewOutboxMessage::for_category(OutboxCategory::ProjectUpdate, 1, 10)
        .with_payload(json!({"name": "a"}));
    let b = NewOutboxMessage::for_category(OutboxCategory::ProjectUpdate, 1, 10)
        .with_payload(json!({"name": "b"}));
    let c = NewOutboxMessage::for_category(OutboxCategory::ProjectUpdate, 1, 11)
        .with_payload(json!({"name": "c"}));
    for message in [a, b, c] {
        outbox.enqueue(message, FlushMode::Deferred).await.unwrap();
    }

    let report = outbox
        .drain_shard(&ShardKey::new(ShardScope::Organization, 1), false)
        .await
        .unwrap();

    assert_eq!(report.delivered, 2);
    assert_eq!(report.superseded, 1);
    assert_eq!(report.stop, DrainStop::Empty);
    assert_eq!(
        recorder.payloads(),
        vec![json!({"name": "b"}), json!({"name": "c"})]
    );
    assert_eq!(outbox.count_pending().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_sweep_backs_off_the_shard() {
    let db = TestDatabase::new().await;
    let recorder = Recorder::failing();
    let worker = OutboxWorker::new(db.outbox(registry_for(&recorder), OutboxConfig::default()));
    let key = ShardKey::new(ShardScope::Organization, 4);

    worker
        .outbox()
        .enqueue(
            NewOutboxMessage::for_category(OutboxCategory::OrganizationUpdate, 4, 4),
            FlushMode::Deferred,
        )
        .await
        .unwrap();

    let before = scheduler::now();
    let report = worker.sweep_once().await.unwrap();
    assert_eq!(report.shards_found, 1);
    assert_eq!(report.shards_drained, 1);
    assert_eq!(report.shards_failed, 1);
    assert_eq!(report.delivered, 0);

    let remaining = worker.outbox().messages_in_shard(&key).await.unwrap();
    assert_eq!(remaining.len(), 1);
    let pushed = remaining[0].scheduled_for;
    assert!(pushed >= before + Duration::seconds(1), "{} not pushed", pushed);
    assert!(pushed <= scheduler::now() + Duration::hours(1));

    // not due again yet
    let report = worker.sweep_once().await.unwrap();
    assert_eq!(report.shards_found, 0);
    assert_eq!(recorder.count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_message_is_redelivered_with_the_same_payload() {
    let db = TestDatabase::new().await;
    let recorder = Recorder::failing();
    let worker = OutboxWorker::new(db.outbox(registry_for(&recorder), OutboxConfig::default()));
    let key = ShardKey::new(ShardScope::User, 21);

    worker
        .outbox()
        .enqueue(
            NewOutboxMessage::for_category(OutboxCategory::UserUpdate, 21, 21)
                .with_payload(json!({"username": "tess"})),
            FlushMode::Deferred,
        )
        .await
        .unwrap();

    worker.sweep_once().await.unwrap();
    assert_eq!(worker.outbox().count_pending().await.unwrap(), 1);

    recorder.set_failing(false);
    worker.outbox().reset_shard_schedule(&key).await.unwrap();
    let report = worker.sweep_once().await.unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(
        recorder.payloads(),
        vec![json!({"username": "tess"}), json!({"username": "tess"})]
    );
    assert_eq!(worker.outbox().count_pending().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_synchronous_flush_reschedules_and_keeps_the_message() {
    let db = TestDatabase::new().await;
    let recorder = Recorder::failing();
    let outbox = db.outbox(registry_for(&recorder), OutboxConfig::default());

    let before = scheduler::now();
    let message = outbox
        .enqueue(
            NewOutboxMessage::for_category(OutboxCategory::TeamUpdate, 8, 8),
            FlushMode::Immediate,
        )
        .await
        .expect("a failed flush does not fail the enqueue");

    assert_eq!(recorder.count(), 1);
    let remaining = outbox.messages_in_shard(&message.shard_key()).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, message.id);
    assert!(remaining[0].scheduled_for > before);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failure_stops_the_pass_and_preserves_later_messages() {
    let db = TestDatabase::new().await;
    let recorder = Recorder::failing();
    let outbox = db.outbox(registry_for(&recorder), OutboxConfig::default());
    let key = ShardKey::new(ShardScope::Organization, 30);

    for object in 1..=3 {
        outbox
            .enqueue(
                NewOutboxMessage::for_category(OutboxCategory::OrganizationMemberUpdate, 30, object),
                FlushMode::Deferred,
            )
            .await
            .unwrap();
    }

    let report = outbox.drain_shard(&key, true).await.unwrap();
    assert_eq!(report.stop, DrainStop::DeliveryFailed);
    assert_eq!(report.delivered, 0);
    assert_eq!(recorder.count(), 1);
    assert_eq!(recorder.attempts()[0].object_identifier, 1);
    assert_eq!(outbox.count_pending().await.unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_kill_switch_scope_drains_without_handlers() {
    let db = TestDatabase::new().await;
    let recorder = Recorder::new();
    let config = OutboxConfig::builder()
        .disable_scope(ShardScope::AuditLog)
        .build();
    let worker = OutboxWorker::new(db.outbox(registry_for(&recorder), config));

    for _ in 0..3 {
        worker
            .outbox()
            .enqueue(
                NewOutboxMessage::for_category(OutboxCategory::AuditLogEvent, 12, 1),
                FlushMode::Deferred,
            )
            .await
            .unwrap();
    }

    let report = worker.sweep_once().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.superseded, 2);
    assert_eq!(report.delivered, 0);
    assert_eq!(recorder.count(), 0);
    assert_eq!(worker.outbox().count_pending().await.unwrap(), 0);
}
