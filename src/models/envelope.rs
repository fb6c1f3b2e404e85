// Response envelope shared by every category endpoint

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `{ success, data?, error?, lastUpdated?, nextUpdate? }`.
/// `success: false` is a failure regardless of HTTP status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEnvelope<T = serde_json::Value> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_update: Option<DateTime<Utc>>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            last_updated: None,
            next_update: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            last_updated: None,
            next_update: None,
        }
    }

    pub fn with_timestamps(
        mut self,
        last_updated: Option<DateTime<Utc>>,
        next_update: Option<DateTime<Utc>>,
    ) -> Self {
        self.last_updated = last_updated;
        self.next_update = next_update;
        self
    }
}
