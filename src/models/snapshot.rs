// Read-model handed to observers: per-slot state plus derived global state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Slot lifecycle: Idle -> Loading -> {Success, Failure}; a settled slot goes back to Loading on refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotPhase {
    Idle,
    Loading,
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotSnapshot {
    pub name: String,
    pub phase: SlotPhase,
    pub data: Option<serde_json::Value>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub next_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryError {
    pub category: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorSnapshot {
    /// Declaration order.
    pub slots: Vec<SlotSnapshot>,
    pub global_is_loading: bool,
    /// Error of the most recently settled slot that currently holds one.
    pub global_error: Option<String>,
    /// Every current per-category error, declaration order.
    pub errors: Vec<CategoryError>,
    pub is_auto_updating: bool,
    pub update_interval_ms: u64,
    pub taken_at: DateTime<Utc>,
}

impl AggregatorSnapshot {
    pub fn slot(&self, name: &str) -> Option<&SlotSnapshot> {
        self.slots.iter().find(|s| s.name == name)
    }
}
