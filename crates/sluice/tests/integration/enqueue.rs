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

//! Enqueueing and write-time validation.

use crate::fixtures::{registry_for, Recorder, TestDatabase};
use serde_json::json;
use sluice::outbox::scheduler::the_past;
use sluice::{
    FlushMode, NewOutboxMessage, OutboxCategory, OutboxConfig, OutboxError, ShardKey, ShardScope,
    ValidationError,
};

#[tokio::test(flavor = "multi_thread")]
async fn test_enqueue_persists_a_fresh_message() {
    let db = TestDatabase::new().await;
    let recorder = Recorder::new();
    let outbox = db.outbox(registry_for(&recorder), OutboxConfig::default());

    let message = outbox
        .enqueue(
            NewOutboxMessage::for_category(OutboxCategory::OrganizationUpdate, 11, 11)
                .with_payload(json!({"slug": "acme"})),
            FlushMode::Deferred,
        )
        .await
        .expect("enqueue failed");

    assert!(message.id > 0);
    assert_eq!(message.shard_scope, ShardScope::Organization);
    assert_eq!(message.scheduled_for, the_past());
    assert_eq!(message.payload, Some(json!({"slug": "acme"})));
    assert_eq!(message.region_name, None);

    let stored = outbox
        .messages_in_shard(&ShardKey::new(ShardScope::Organization, 11))
        .await
        .unwrap();
    assert_eq!(stored, vec![message]);
    assert_eq!(recorder.count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unregistered_category_is_rejected_before_persistence() {
    let db = TestDatabase::new().await;
    let recorder = Recorder::new();
    let outbox = db.outbox(registry_for(&recorder), OutboxConfig::default());

    let result = outbox
        .enqueue(
            NewOutboxMessage::new(ShardScope::Organization, 1, OutboxCategory::WebhookProxy, 1),
            FlushMode::Immediate,
        )
        .await;

    match result {
        Err(OutboxError::Validation(ValidationError::CategoryNotInScope { scope, category })) => {
            assert_eq!(scope, ShardScope::Organization);
            assert_eq!(category, OutboxCategory::WebhookProxy);
        }
        other => panic!("expected validation error, got {:?}", other),
    }
    assert_eq!(outbox.count_pending().await.unwrap(), 0);
    assert_eq!(recorder.count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_immediate_flush_delivers_before_returning() {
    let db = TestDatabase::new().await;
    let recorder = Recorder::new();
    let outbox = db.outbox(registry_for(&recorder), OutboxConfig::default());

    outbox
        .enqueue(
            NewOutboxMessage::for_category(OutboxCategory::UserUpdate, 3, 3)
                .with_payload(json!({"email": "a@example.com"})),
            FlushMode::Immediate,
        )
        .await
        .unwrap();

    assert_eq!(recorder.payloads(), vec![json!({"email": "a@example.com"})]);
    assert_eq!(outbox.count_pending().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_regions_are_separate_shards() {
    let db = TestDatabase::new().await;
    let recorder = Recorder::new();
    let outbox = db.outbox(registry_for(&recorder), OutboxConfig::default());

    for region in [None, Some("us"), Some("eu")] {
        let mut message = NewOutboxMessage::for_category(OutboxCategory::UserUpdate, 8, 8);
        if let Some(region) = region {
            message = message.with_region(region);
        }
        outbox.enqueue(message, FlushMode::Deferred).await.unwrap();
    }

    let report = outbox
        .drain_shard(&ShardKey::in_region("us", ShardScope::User, 8), true)
        .await
        .unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(recorder.attempts()[0].region_name.as_deref(), Some("us"));

    assert_eq!(outbox.count_pending().await.unwrap(), 2);
    let control = outbox
        .messages_in_shard(&ShardKey::new(ShardScope::User, 8))
        .await
        .unwrap();
    assert_eq!(control.len(), 1);
    assert_eq!(control[0].region_name, None);
}
