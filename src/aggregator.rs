// Aggregator: owns every category slot, drives fetches through the DataSource and
// publishes a snapshot after each slot transition.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, instrument, warn};

use crate::fetch_client::{DataSource, Endpoint, FetchError};
use crate::models::{AggregatorSnapshot, CategoryError, SlotSnapshot};
use crate::slot::CategorySlot;

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BROADCAST_CAPACITY: usize = 64;

/// A registered data category and where to fetch it from.
#[derive(Debug, Clone)]
pub struct Category {
    pub name: String,
    pub endpoint: Endpoint,
}

impl Category {
    pub fn new(name: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            name: name.into(),
            endpoint,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    /// Upper bound for one fetch; elapsing resolves the fetch as `FetchError::Timeout`.
    pub request_timeout: Duration,
    pub update_interval: Duration,
    /// Max snapshots buffered per observer (slow observers lag).
    pub broadcast_capacity: usize,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }
}

/// Caller bugs. Never stored in slot state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregatorError {
    #[error("unknown category '{0}'")]
    UnknownCategory(String),
    #[error("category '{0}' registered more than once")]
    DuplicateCategory(String),
    #[error("at least one category must be registered")]
    NoCategories,
}

struct AggregatorState {
    slots: Vec<CategorySlot>,
    settle_counter: u64,
    is_auto_updating: bool,
    update_interval: Duration,
    next_cycle_at: Option<DateTime<Utc>>,
}

impl AggregatorState {
    fn next_order(&mut self) -> u64 {
        self.settle_counter += 1;
        self.settle_counter
    }

    fn global_is_loading(&self) -> bool {
        self.slots.iter().any(CategorySlot::is_loading)
    }

    /// Latest settled slot still holding an error; the counter breaks ties.
    fn global_error(&self) -> Option<String> {
        self.slots
            .iter()
            .filter(|s| s.error().is_some())
            .max_by_key(|s| s.settled_order())
            .and_then(|s| s.error().map(str::to_owned))
    }

    fn snapshot(&self) -> AggregatorSnapshot {
        let scheduled_next = if self.is_auto_updating {
            self.next_cycle_at
        } else {
            None
        };
        AggregatorSnapshot {
            slots: self
                .slots
                .iter()
                .map(|s| s.snapshot(scheduled_next))
                .collect(),
            global_is_loading: self.global_is_loading(),
            global_error: self.global_error(),
            errors: self
                .slots
                .iter()
                .filter_map(|s| {
                    s.error().map(|message| CategoryError {
                        category: s.name().to_owned(),
                        message: message.to_owned(),
                    })
                })
                .collect(),
            is_auto_updating: self.is_auto_updating,
            update_interval_ms: self.update_interval.as_millis() as u64,
            taken_at: Utc::now(),
        }
    }
}

pub struct Aggregator {
    categories: Vec<Category>,
    source: Arc<dyn DataSource>,
    request_timeout: Duration,
    state: RwLock<AggregatorState>,
    tx: broadcast::Sender<AggregatorSnapshot>,
}

impl Aggregator {
    /// Registers `categories` in the given order. The set is fixed for the aggregator's lifetime.
    pub fn new(
        categories: Vec<Category>,
        source: Arc<dyn DataSource>,
        options: AggregatorOptions,
    ) -> Result<Self, AggregatorError> {
        if categories.is_empty() {
            return Err(AggregatorError::NoCategories);
        }
        let mut seen = HashSet::with_capacity(categories.len());
        for c in &categories {
            if !seen.insert(c.name.as_str()) {
                return Err(AggregatorError::DuplicateCategory(c.name.clone()));
            }
        }

        let slots = categories
            .iter()
            .map(|c| CategorySlot::new(c.name.clone()))
            .collect();
        let (tx, _) = broadcast::channel(options.broadcast_capacity.max(1));
        Ok(Self {
            categories,
            source,
            request_timeout: options.request_timeout,
            state: RwLock::new(AggregatorState {
                slots,
                settle_counter: 0,
                is_auto_updating: false,
                update_interval: options.update_interval,
                next_cycle_at: None,
            }),
            tx,
        })
    }

    pub fn category_names(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(|c| c.name.as_str())
    }

    /// Receives a snapshot after every slot transition and schedule change.
    pub fn subscribe(&self) -> broadcast::Receiver<AggregatorSnapshot> {
        self.tx.subscribe()
    }

    pub async fn snapshot(&self) -> AggregatorSnapshot {
        self.state.read().await.snapshot()
    }

    pub async fn slot(&self, category: &str) -> Result<SlotSnapshot, AggregatorError> {
        let index = self.index_of(category)?;
        let state = self.state.read().await;
        let scheduled_next = state.is_auto_updating.then_some(state.next_cycle_at).flatten();
        Ok(state.slots[index].snapshot(scheduled_next))
    }

    /// Fetches one category and returns its slot once the fetch settles.
    pub async fn refresh_one(&self, category: &str) -> Result<SlotSnapshot, AggregatorError> {
        let index = self.index_of(category)?;
        self.refresh_index(index).await;
        self.slot(category).await
    }

    /// Fetches every category concurrently and waits for all of them, whatever their outcome.
    pub async fn refresh_all(&self) -> AggregatorSnapshot {
        join_all((0..self.categories.len()).map(|i| self.refresh_index(i))).await;
        self.snapshot().await
    }

    /// Records scheduler state so snapshots carry `isAutoUpdating` and `nextUpdate`.
    pub async fn record_schedule(
        &self,
        is_auto_updating: bool,
        update_interval: Duration,
        next_cycle_at: Option<DateTime<Utc>>,
    ) {
        let mut state = self.state.write().await;
        state.is_auto_updating = is_auto_updating;
        state.update_interval = update_interval;
        state.next_cycle_at = next_cycle_at;
        self.publish(&state);
    }

    fn index_of(&self, category: &str) -> Result<usize, AggregatorError> {
        self.categories
            .iter()
            .position(|c| c.name == category)
            .ok_or_else(|| {
                tracing::error!(category, "refresh requested for unregistered category");
                AggregatorError::UnknownCategory(category.to_owned())
            })
    }

    #[instrument(skip(self), fields(category = %self.categories[index].name))]
    async fn refresh_index(&self, index: usize) {
        let category = &self.categories[index];
        let seq = {
            let mut state = self.state.write().await;
            let seq = state.slots[index].begin_fetch();
            self.publish(&state);
            seq
        };

        let result = match tokio::time::timeout(
            self.request_timeout,
            self.source.fetch(&category.endpoint),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.request_timeout)),
        };

        let mut state = self.state.write().await;
        let order = state.next_order();
        let slot = &mut state.slots[index];
        let applied = match result {
            Ok(response) => slot.complete_fetch(seq, response, Utc::now(), order),
            Err(e) => {
                warn!(error = %e, seq, operation = "fetch_category", "category fetch failed");
                slot.fail_fetch(seq, e.to_string(), order)
            }
        };
        if applied {
            debug!(seq, "category settled");
            self.publish(&state);
        } else {
            debug!(seq, "dropping response superseded by a newer request");
        }
    }

    fn publish(&self, state: &AggregatorState) {
        // No observers is normal (e.g. headless use); nothing to do.
        let _ = self.tx.send(state.snapshot());
    }
}
