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

//! Coalescing: only the newest message of a group is delivered.

use chrono::NaiveDateTime;

/// The members of one coalesce group, split into the representative and the
/// rows it supersedes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalescedGroup {
    /// Highest id in the group; the only message delivered
    pub representative_id: i64,
    /// Lowest id in the group
    pub oldest_id: i64,
    pub oldest_added: NaiveDateTime,
    /// Every id below the representative
    pub superseded: Vec<i64>,
}

impl CoalescedGroup {
    /// Groups `(id, date_added)` pairs. Returns `None` for an empty group.
    pub fn from_members(members: &[(i64, NaiveDateTime)]) -> Option<Self> {
        let (representative_id, _) = *members.iter().max_by_key(|(id, _)| *id)?;
        let (oldest_id, oldest_added) = *members.iter().min_by_key(|(id, _)| *id)?;
        let mut superseded: Vec<i64> = members
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| *id < representative_id)
            .collect();
        superseded.sort_unstable();
        superseded.dedup();

        Some(Self {
            representative_id,
            oldest_id,
            oldest_added,
            superseded,
        })
    }

    /// Superseded ids in delete batches of at most `batch_size`.
    pub fn superseded_batches(&self, batch_size: usize) -> std::slice::Chunks<'_, i64> {
        self.superseded.chunks(batch_size.max(1))
    }
}
