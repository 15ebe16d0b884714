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

//! Shard reservation and exponential backoff.

use crate::fixtures::{registry_for, Recorder, TestDatabase};
use chrono::Duration;
use sluice::outbox::scheduler::{self, MAX_DELAY};
use sluice::{
    FlushMode, NewOutboxMessage, Outbox, OutboxCategory, OutboxConfig, OutboxMessage, ShardKey,
    ShardScope,
};

async fn seeded(db: &TestDatabase, objects: &[i64]) -> (Outbox, ShardKey) {
    let outbox = db.outbox(registry_for(&Recorder::new()), OutboxConfig::default());
    for object in objects {
        outbox
            .enqueue(
                NewOutboxMessage::for_category(OutboxCategory::OrganizationUpdate, 2, *object),
                FlushMode::Deferred,
            )
            .await
            .unwrap();
    }
    (outbox, ShardKey::new(ShardScope::Organization, 2))
}

fn interval(rows: &[OutboxMessage]) -> Duration {
    rows[0].scheduled_for - rows[0].scheduled_from
}

#[tokio::test(flavor = "multi_thread")]
async fn test_first_reservation_uses_the_minimum_delay() {
    let db = TestDatabase::new().await;
    let (outbox, key) = seeded(&db, &[1]).await;

    let before = scheduler::now();
    let reserved = outbox
        .prepare_next_from_shard(&key)
        .await
        .unwrap()
        .expect("fresh message should be due");
    assert_eq!(reserved.scheduled_for, scheduler::the_past());

    let rows = outbox.messages_in_shard(&key).await.unwrap();
    assert_eq!(interval(&rows), Duration::seconds(2));
    assert!(rows[0].scheduled_from >= before);

    // pushed into the future, so a second reservation finds nothing due
    assert!(outbox.prepare_next_from_shard(&key).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reservation_pushes_every_message_in_the_shard() {
    let db = TestDatabase::new().await;
    let (outbox, key) = seeded(&db, &[1, 2, 3]).await;

    let reserved = outbox.prepare_next_from_shard(&key).await.unwrap().unwrap();
    assert_eq!(reserved.object_identifier, 1);

    let rows = outbox.messages_in_shard(&key).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows
        .iter()
        .all(|row| row.scheduled_for == rows[0].scheduled_for
            && row.scheduled_from == rows[0].scheduled_from));
    assert!(rows[0].scheduled_for > scheduler::now());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_interval_doubles() {
    let db = TestDatabase::new().await;
    let (outbox, key) = seeded(&db, &[1]).await;

    let now = scheduler::now();
    outbox
        .dal()
        .outbox()
        .set_shard_schedule(&key, now - Duration::seconds(10), now - Duration::seconds(2))
        .await
        .unwrap();

    assert!(outbox.prepare_next_from_shard(&key).await.unwrap().is_some());
    let rows = outbox.messages_in_shard(&key).await.unwrap();
    assert_eq!(interval(&rows), Duration::seconds(16));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_interval_is_capped_at_one_hour() {
    let db = TestDatabase::new().await;
    let (outbox, key) = seeded(&db, &[1]).await;

    let now = scheduler::now();
    outbox
        .dal()
        .outbox()
        .set_shard_schedule(&key, now - Duration::minutes(46), now - Duration::minutes(1))
        .await
        .unwrap();

    assert!(outbox.prepare_next_from_shard(&key).await.unwrap().is_some());
    let rows = outbox.messages_in_shard(&key).await.unwrap();
    assert_eq!(interval(&rows), MAX_DELAY);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_future_schedule_is_not_due() {
    let db = TestDatabase::new().await;
    let (outbox, key) = seeded(&db, &[1]).await;

    let now = scheduler::now();
    outbox
        .dal()
        .outbox()
        .set_shard_schedule(&key, now, now + Duration::minutes(5))
        .await
        .unwrap();

    assert!(outbox.prepare_next_from_shard(&key).await.unwrap().is_none());
    assert!(outbox.find_scheduled_shards(0, i64::MAX).await.unwrap().is_empty());

    // a drain ignores the schedule
    let report = outbox.drain_shard(&key, true).await.unwrap();
    assert_eq!(report.delivered, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reset_restarts_backoff() {
    let db = TestDatabase::new().await;
    let (outbox, key) = seeded(&db, &[1, 2]).await;

    outbox.prepare_next_from_shard(&key).await.unwrap().unwrap();
    assert!(outbox.prepare_next_from_shard(&key).await.unwrap().is_none());

    assert_eq!(outbox.reset_shard_schedule(&key).await.unwrap(), 2);
    let rows = outbox.messages_in_shard(&key).await.unwrap();
    assert!(rows.iter().all(|row| row.scheduled_for == scheduler::the_past()));

    outbox.prepare_next_from_shard(&key).await.unwrap().unwrap();
    let rows = outbox.messages_in_shard(&key).await.unwrap();
    assert_eq!(interval(&rows), Duration::seconds(2));
}
