// Per-category state container with sequence-numbered fetches

use chrono::{DateTime, Utc};

use crate::fetch_client::FetchResponse;
use crate::models::{SlotPhase, SlotSnapshot};

/// State for one category. Only the aggregator mutates it.
///
/// Every `begin_fetch` issues a new sequence number; a settlement whose number is not the
/// latest issued one is stale and ignored, so the most recently issued request always wins.
#[derive(Debug, Clone)]
pub struct CategorySlot {
    name: String,
    phase: SlotPhase,
    data: Option<serde_json::Value>,
    error: Option<String>,
    last_updated: Option<DateTime<Utc>>,
    next_update_hint: Option<DateTime<Utc>>,
    issued_seq: u64,
    settled_order: u64,
}

impl CategorySlot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: SlotPhase::Idle,
            data: None,
            error: None,
            last_updated: None,
            next_update_hint: None,
            issued_seq: 0,
            settled_order: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> SlotPhase {
        self.phase
    }

    pub fn is_loading(&self) -> bool {
        self.phase == SlotPhase::Loading
    }

    pub fn data(&self) -> Option<&serde_json::Value> {
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    /// Aggregator-wide settlement counter value at this slot's last applied settlement.
    pub fn settled_order(&self) -> u64 {
        self.settled_order
    }

    /// Marks the slot loading and returns the new request's sequence number.
    /// Keeps `data` and `error` so consumers can show them while revalidating.
    /// Calling this while already loading supersedes the outstanding request.
    pub fn begin_fetch(&mut self) -> u64 {
        if self.is_loading() {
            tracing::debug!(
                category = %self.name,
                superseded_seq = self.issued_seq,
                "superseding in-flight fetch"
            );
        }
        self.issued_seq += 1;
        self.phase = SlotPhase::Loading;
        self.issued_seq
    }

    /// Applies a successful fetch. Returns false (and changes nothing) when `seq` is stale.
    /// `last_updated` falls back to `now` when the server sent no hint.
    pub fn complete_fetch(
        &mut self,
        seq: u64,
        response: FetchResponse,
        now: DateTime<Utc>,
        order: u64,
    ) -> bool {
        if seq != self.issued_seq {
            return false;
        }
        self.phase = SlotPhase::Success;
        self.data = Some(response.data);
        self.error = None;
        self.last_updated = Some(response.last_updated.unwrap_or(now));
        self.next_update_hint = response.next_update;
        self.settled_order = order;
        true
    }

    /// Applies a failed fetch, keeping the previous `data`. Returns false when `seq` is stale.
    pub fn fail_fetch(&mut self, seq: u64, message: impl Into<String>, order: u64) -> bool {
        if seq != self.issued_seq {
            return false;
        }
        self.phase = SlotPhase::Failure;
        self.error = Some(message.into());
        self.settled_order = order;
        true
    }

    /// `scheduled_next` is the scheduler's next cycle, `None` while auto-update is off.
    /// While running, the server's hint takes precedence; while stopped there is no next update.
    pub fn snapshot(&self, scheduled_next: Option<DateTime<Utc>>) -> SlotSnapshot {
        SlotSnapshot {
            name: self.name.clone(),
            phase: self.phase,
            data: self.data.clone(),
            is_loading: self.is_loading(),
            error: self.error.clone(),
            last_updated: self.last_updated,
            next_update: scheduled_next.map(|s| self.next_update_hint.unwrap_or(s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_slot_is_idle_and_empty() {
        let slot = CategorySlot::new("glucose");
        assert_eq!(slot.phase(), SlotPhase::Idle);
        assert!(!slot.is_loading());
        assert!(slot.data().is_none());
        assert!(slot.error().is_none());
    }

    #[test]
    fn begin_keeps_stale_data_and_error() {
        let mut slot = CategorySlot::new("glucose");
        let seq = slot.begin_fetch();
        assert!(slot.complete_fetch(seq, FetchResponse::new(json!([1])), Utc::now(), 1));
        let seq = slot.begin_fetch();
        assert!(slot.fail_fetch(seq, "HTTP 502", 2));

        slot.begin_fetch();
        assert!(slot.is_loading());
        assert_eq!(slot.data(), Some(&json!([1])));
        assert_eq!(slot.error(), Some("HTTP 502"));
    }

    #[test]
    fn complete_clears_error_and_uses_server_timestamp() {
        let mut slot = CategorySlot::new("summary");
        let seq = slot.begin_fetch();
        slot.fail_fetch(seq, "boom", 1);

        let hint: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        let seq = slot.begin_fetch();
        let response = FetchResponse {
            data: json!({"avg": 120}),
            last_updated: Some(hint),
            next_update: None,
        };
        assert!(slot.complete_fetch(seq, response, Utc::now(), 2));
        assert_eq!(slot.phase(), SlotPhase::Success);
        assert!(slot.error().is_none());
        assert_eq!(slot.last_updated(), Some(hint));
    }

    #[test]
    fn stale_sequence_is_ignored() {
        let mut slot = CategorySlot::new("patterns");
        let first = slot.begin_fetch();
        let second = slot.begin_fetch();

        assert!(slot.complete_fetch(second, FetchResponse::new(json!("new")), Utc::now(), 1));
        assert!(!slot.complete_fetch(first, FetchResponse::new(json!("old")), Utc::now(), 2));
        assert!(!slot.fail_fetch(first, "late failure", 3));

        assert_eq!(slot.data(), Some(&json!("new")));
        assert!(slot.error().is_none());
        assert_eq!(slot.settled_order(), 1);
    }

    #[test]
    fn stays_loading_until_latest_request_settles() {
        let mut slot = CategorySlot::new("insulin");
        let first = slot.begin_fetch();
        let _second = slot.begin_fetch();
        slot.complete_fetch(first, FetchResponse::new(json!(1)), Utc::now(), 1);
        assert!(slot.is_loading());
    }

    #[test]
    fn snapshot_prefers_server_next_update() {
        let mut slot = CategorySlot::new("glucose");
        let scheduled: DateTime<Utc> = "2030-01-01T00:00:00Z".parse().unwrap();
        assert_eq!(slot.snapshot(Some(scheduled)).next_update, Some(scheduled));

        let hint: DateTime<Utc> = "2029-06-01T00:00:00Z".parse().unwrap();
        let seq = slot.begin_fetch();
        let response = FetchResponse {
            data: json!([]),
            last_updated: None,
            next_update: Some(hint),
        };
        slot.complete_fetch(seq, response, Utc::now(), 1);
        assert_eq!(slot.snapshot(Some(scheduled)).next_update, Some(hint));
        assert!(slot.snapshot(None).next_update.is_none());
    }
}
