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

//! Retry scheduling.
//!
//! A reservation pushes a message's `scheduled_for` forward by double the
//! previous interval, bounded below by one second and above by one hour.
//! A message that keeps failing is therefore retried roughly hourly forever.

use chrono::{Duration, NaiveDate, NaiveDateTime};

/// Floor for the previous backoff interval.
pub const MIN_DELAY: Duration = Duration::seconds(1);

/// Ceiling for any backoff interval.
pub const MAX_DELAY: Duration = Duration::hours(1);

/// `scheduled_for` of a message that has never been reserved (2016-08-01 UTC).
pub fn the_past() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2016, 8, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Current UTC wall-clock time as stored in the table.
pub fn now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

/// Computes `now + min(max(scheduled_for - scheduled_from, 1s) * 2, 1h)`.
pub fn next_schedule(
    scheduled_from: NaiveDateTime,
    scheduled_for: NaiveDateTime,
    now: NaiveDateTime,
) -> NaiveDateTime {
    let last_delay = (scheduled_for - scheduled_from).max(MIN_DELAY);
    now + (last_delay * 2).min(MAX_DELAY)
}

/// Splits the ids `[low, high]` into at most `partitions` consecutive
/// half-open windows `[start, end)` of near-equal width.
///
/// The number of windows depends only on `partitions`, never on how sparse
/// the id range is.
pub fn id_partitions(low: i64, high: i64, partitions: usize) -> Vec<(i64, i64)> {
    if high < low {
        return Vec::new();
    }
    let end = i128::from(high) + 1;
    let span = end - i128::from(low);
    let count = (partitions.max(1) as i128).min(span);
    let width = (span + count - 1) / count;

    let mut windows = Vec::with_capacity(count as usize);
    let mut start = i128::from(low);
    while start < end {
        let stop = (start + width).min(end);
        windows.push((start as i64, stop.min(i128::from(i64::MAX)) as i64));
        start = stop;
    }
    windows
}
