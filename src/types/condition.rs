// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Typed status conditions.
//!
//! Conditions are keyed by type: setting a condition replaces the entry of
//! the same type instead of appending a new one, and the transition time
//! only moves when the status value changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Condition type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// Issuer readiness, or the mirrored state on a certificate request.
    Ready,
    /// The order has been issued a certificate.
    Issued,
    /// The order is waiting on the EST server or on its issuer.
    Pending,
    /// The order was refused, by the server or by local validation.
    Rejected,
}

impl ConditionType {
    /// Name of the condition type as it appears in status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::Issued => "Issued",
            Self::Pending => "Pending",
            Self::Rejected => "Rejected",
        }
    }
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition status value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// The condition holds.
    True,
    /// The condition does not hold.
    False,
    /// Not yet known.
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

/// A typed, timestamped status entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type.
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    /// Condition status.
    pub status: ConditionStatus,
    /// Machine-readable, CamelCase reason.
    pub reason: String,
    /// Human-readable message.
    pub message: String,
    /// Last time `status` changed.
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a condition stamped with `now`.
    pub fn new(
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            condition_type,
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: now,
        }
    }

    /// Returns true if this condition has status `True`.
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Set `condition` in `conditions`, replacing any entry of the same type.
///
/// When the existing entry already has the same status its transition time
/// is kept. Returns true if the list changed.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) -> bool {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition.condition_type)
    {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            if *existing == condition {
                return false;
            }
            *existing = condition;
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

/// Find the condition of the given type.
pub fn find_condition(
    conditions: &[Condition],
    condition_type: ConditionType,
) -> Option<&Condition> {
    conditions
        .iter()
        .find(|c| c.condition_type == condition_type)
}

/// Returns true if the condition of the given type exists and is `True`.
pub fn is_condition_true(conditions: &[Condition], condition_type: ConditionType) -> bool {
    find_condition(conditions, condition_type).is_some_and(Condition::is_true)
}
