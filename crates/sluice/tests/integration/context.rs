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

//! Producer-owned transactions with post-commit flushing.

use crate::fixtures::{in_transaction, registry_for, Recorder, TestDatabase};
use serde_json::json;
use sluice::{
    FlushMode, NewOutboxMessage, OutboxCategory, OutboxConfig, OutboxContext, OutboxError,
    ShardKey, ShardScope,
};

#[tokio::test(flavor = "multi_thread")]
async fn test_commit_then_flush_delivers_touched_shards() {
    let db = TestDatabase::new().await;
    let recorder = Recorder::new();
    let outbox = db.outbox(registry_for(&recorder), OutboxConfig::default());

    let context = in_transaction(&db.database, |conn| {
        let mut context = OutboxContext::new(FlushMode::Immediate);
        context.enqueue(
            conn,
            NewOutboxMessage::for_category(OutboxCategory::OrganizationUpdate, 3, 3)
                .with_payload(json!({"v": 1})),
        )?;
        context.enqueue(
            conn,
            NewOutboxMessage::for_category(OutboxCategory::OrganizationUpdate, 3, 3)
                .with_payload(json!({"v": 2})),
        )?;
        context.enqueue(conn, NewOutboxMessage::for_category(OutboxCategory::UserUpdate, 4, 4))?;
        Ok(context)
    })
    .await
    .unwrap();

    assert_eq!(
        context.shards(),
        &[
            ShardKey::new(ShardScope::Organization, 3),
            ShardKey::new(ShardScope::User, 4)
        ]
    );
    assert_eq!(recorder.count(), 0);

    let reports = outbox.flush_context(context).await;
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].delivered, 1);
    assert_eq!(reports[0].superseded, 1);
    assert_eq!(recorder.payloads()[0], json!({"v": 2}));
    assert_eq!(recorder.count(), 2);
    assert_eq!(outbox.count_pending().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rollback_persists_nothing() {
    let db = TestDatabase::new().await;
    let recorder = Recorder::new();
    let outbox = db.outbox(registry_for(&recorder), OutboxConfig::default());

    let result: Result<OutboxContext, _> = in_transaction(&db.database, |conn| {
        let mut context = OutboxContext::new(FlushMode::Immediate);
        context.enqueue(conn, NewOutboxMessage::for_category(OutboxCategory::TeamUpdate, 1, 1))?;
        Err(OutboxError::Configuration {
            message: "producer aborted".to_string(),
        })
    })
    .await;

    assert!(result.is_err());
    assert_eq!(outbox.count_pending().await.unwrap(), 0);
    assert_eq!(recorder.count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_message_aborts_the_producer_transaction() {
    let db = TestDatabase::new().await;
    let outbox = db.outbox(registry_for(&Recorder::new()), OutboxConfig::default());

    let result = in_transaction(&db.database, |conn| {
        let mut context = OutboxContext::new(FlushMode::Immediate);
        context.enqueue(conn, NewOutboxMessage::for_category(OutboxCategory::TeamUpdate, 1, 1))?;
        context.enqueue(
            conn,
            NewOutboxMessage::new(ShardScope::Team, 1, OutboxCategory::UserUpdate, 1),
        )?;
        Ok(context)
    })
    .await;

    assert!(matches!(result, Err(OutboxError::Validation(_))));
    assert_eq!(outbox.count_pending().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_deferred_context_leaves_delivery_to_the_sweep() {
    let db = TestDatabase::new().await;
    let recorder = Recorder::new();
    let outbox = db.outbox(registry_for(&recorder), OutboxConfig::default());

    let context = in_transaction(&db.database, |conn| {
        let mut context = OutboxContext::new(FlushMode::Deferred);
        context.enqueue(conn, NewOutboxMessage::for_category(OutboxCategory::AppUpdate, 2, 2))?;
        Ok(context)
    })
    .await
    .unwrap();

    assert!(outbox.flush_context(context).await.is_empty());
    assert_eq!(recorder.count(), 0);
    assert_eq!(outbox.count_pending().await.unwrap(), 1);
}
