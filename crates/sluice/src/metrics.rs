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

//! Outbox metrics.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! application installs a recorder.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};

use crate::models::OutboxCategory;

/// Messages written to the outbox.
pub const SAVED: &str = "outbox.saved";

/// Representatives delivered and deleted.
pub const PROCESSED: &str = "outbox.processed";

/// Message groups dropped by the kill switch.
pub const SKIPPED: &str = "outbox.skipped";

/// Handler invocations that returned an error.
pub const DELIVERY_FAILED: &str = "outbox.delivery_failed";

/// Reservations abandoned because another drainer held the lock.
pub const CONTENDED: &str = "outbox.contended";

/// Seconds between the oldest message of a coalesce group and its delivery.
pub const COALESCED_NET_QUEUE_TIME: &str = "outbox.coalesced_net_queue_time";

/// Seconds between a representative's creation and its delivery.
pub const PROCESSING_LAG: &str = "outbox.processing_lag";

/// Seconds spent inside the handler.
pub const DELIVERY_DURATION: &str = "outbox.delivery_duration";

/// Registers metric descriptions. Call once after installing a recorder.
pub fn register_metrics() {
    describe_counter!(SAVED, "Outbox messages enqueued");
    describe_counter!(PROCESSED, "Outbox messages delivered");
    describe_counter!(SKIPPED, "Outbox message groups dropped by the kill switch");
    describe_counter!(DELIVERY_FAILED, "Outbox handler failures");
    describe_counter!(CONTENDED, "Outbox reservations lost to another drainer");
    describe_histogram!(
        COALESCED_NET_QUEUE_TIME,
        "Seconds from the oldest coalesced message to delivery"
    );
    describe_histogram!(PROCESSING_LAG, "Seconds from enqueue to delivery");
    describe_histogram!(DELIVERY_DURATION, "Seconds spent in the delivery handler");
}

pub(crate) fn record_saved(category: OutboxCategory) {
    counter!(SAVED, "category" => category.as_str()).increment(1);
}

pub(crate) fn record_processed(
    category: OutboxCategory,
    synchronous: bool,
    queue_time: Duration,
    lag: Duration,
) {
    let labels = [
        ("category", category.as_str().to_string()),
        ("synchronous", synchronous.to_string()),
    ];
    counter!(PROCESSED, &labels).increment(1);
    histogram!(COALESCED_NET_QUEUE_TIME, &labels).record(queue_time.as_secs_f64());
    histogram!(PROCESSING_LAG, &labels).record(lag.as_secs_f64());
}

pub(crate) fn record_skipped(category: OutboxCategory) {
    counter!(SKIPPED, "category" => category.as_str()).increment(1);
}

pub(crate) fn record_delivery(category: OutboxCategory, synchronous: bool, elapsed: Duration, failed: bool) {
    let labels = [
        ("category", category.as_str().to_string()),
        ("synchronous", synchronous.to_string()),
    ];
    histogram!(DELIVERY_DURATION, &labels).record(elapsed.as_secs_f64());
    if failed {
        counter!(DELIVERY_FAILED, &labels).increment(1);
    }
}

pub(crate) fn record_contended(synchronous: bool) {
    counter!(CONTENDED, "synchronous" => synchronous.to_string()).increment(1);
}
