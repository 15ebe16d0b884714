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

//! Operational queries: depths, scheduled shards and counts.

use crate::fixtures::{registry_for, Recorder, TestDatabase};
use sluice::{
    FlushMode, NewOutboxMessage, Outbox, OutboxCategory, OutboxConfig, ShardKey, ShardScope,
};

async fn enqueue(outbox: &Outbox, category: OutboxCategory, shard: i64, object: i64) -> i64 {
    outbox
        .enqueue(
            NewOutboxMessage::for_category(category, shard, object),
            FlushMode::Deferred,
        )
        .await
        .unwrap()
        .id
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shard_depths_are_deepest_first_and_limited() {
    let db = TestDatabase::new().await;
    let outbox = db.outbox(registry_for(&Recorder::new()), OutboxConfig::default());

    for object in 0..3 {
        enqueue(&outbox, OutboxCategory::OrganizationUpdate, 1, object).await;
    }
    enqueue(&outbox, OutboxCategory::OrganizationUpdate, 2, 1).await;
    for object in 0..2 {
        enqueue(&outbox, OutboxCategory::UserUpdate, 5, object).await;
    }

    let depths = outbox.shard_depths(2).await.unwrap();
    assert_eq!(depths.len(), 2);
    assert_eq!(depths[0].key, ShardKey::new(ShardScope::Organization, 1));
    assert_eq!(depths[0].depth, 3);
    assert_eq!(depths[1].key, ShardKey::new(ShardScope::User, 5));
    assert_eq!(depths[1].depth, 2);

    assert_eq!(outbox.shard_depths(10).await.unwrap().len(), 3);
    assert_eq!(outbox.count_pending().await.unwrap(), 6);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_scheduled_shards_respect_the_id_window() {
    let db = TestDatabase::new().await;
    let outbox = db.outbox(registry_for(&Recorder::new()), OutboxConfig::default());

    let first = enqueue(&outbox, OutboxCategory::TeamUpdate, 1, 1).await;
    let second = enqueue(&outbox, OutboxCategory::TeamUpdate, 2, 1).await;
    let third = enqueue(&outbox, OutboxCategory::TeamUpdate, 1, 2).await;

    let window = outbox.find_scheduled_shards(first, second).await.unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].key, ShardKey::new(ShardScope::Team, 1));
    assert_eq!(window[0].latest_id, first);

    let all = outbox.find_scheduled_shards(first, third + 1).await.unwrap();
    let keys: Vec<_> = all.iter().map(|s| s.key.shard_identifier).collect();
    // equal schedules: shard 2 (highest id `second`) before shard 1 (`third`)
    assert_eq!(keys, vec![2, 1]);
    assert_eq!(all[1].latest_id, third);

    assert!(outbox
        .find_scheduled_shards(third + 1, third + 100)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reserved_shards_are_not_scheduled_until_reset() {
    let db = TestDatabase::new().await;
    let outbox = db.outbox(registry_for(&Recorder::new()), OutboxConfig::default());

    enqueue(&outbox, OutboxCategory::IntegrationUpdate, 1, 1).await;
    enqueue(&outbox, OutboxCategory::IntegrationUpdate, 2, 1).await;
    let reserved = ShardKey::new(ShardScope::Integration, 1);

    outbox.prepare_next_from_shard(&reserved).await.unwrap().unwrap();
    let due = outbox.find_scheduled_shards(0, i64::MAX).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].key, ShardKey::new(ShardScope::Integration, 2));

    assert_eq!(outbox.reset_shard_schedule(&reserved).await.unwrap(), 1);
    assert_eq!(outbox.find_scheduled_shards(0, i64::MAX).await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_id_bounds_track_the_table() {
    let db = TestDatabase::new().await;
    let outbox = db.outbox(registry_for(&Recorder::new()), OutboxConfig::default());
    assert_eq!(outbox.dal().outbox().id_bounds().await.unwrap(), None);

    let low = enqueue(&outbox, OutboxCategory::ApiApplicationUpdate, 3, 1).await;
    let high = enqueue(&outbox, OutboxCategory::AppInstallationUpdate, 4, 1).await;
    assert_eq!(
        outbox.dal().outbox().id_bounds().await.unwrap(),
        Some((low, high))
    );

    assert!(outbox.dal().outbox().delete_message(low).await.unwrap());
    assert!(!outbox.dal().outbox().delete_message(low).await.unwrap());
    assert_eq!(
        outbox.dal().outbox().id_bounds().await.unwrap(),
        Some((high, high))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_shard_operations() {
    let db = TestDatabase::new().await;
    let outbox = db.outbox(registry_for(&Recorder::new()), OutboxConfig::default());
    let key = ShardKey::new(ShardScope::Provision, 1);

    assert!(outbox.prepare_next_from_shard(&key).await.unwrap().is_none());
    assert_eq!(outbox.reset_shard_schedule(&key).await.unwrap(), 0);
    assert!(outbox.messages_in_shard(&key).await.unwrap().is_empty());
    assert!(outbox.shard_depths(5).await.unwrap().is_empty());

    let report = outbox.drain_shard(&key, false).await.unwrap();
    assert_eq!(report.delivered, 0);
}
