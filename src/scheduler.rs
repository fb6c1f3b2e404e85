// Auto-update scheduler: runs Aggregator::refresh_all immediately on start and then every
// `interval`. Each cycle runs on its own task, so stopping the timer never cancels fetches
// that are already in flight. A tick is skipped while the previous cycle is still running.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tracing::{debug, info, instrument};

use crate::aggregator::Aggregator;

/// `tokio::time::interval` panics on a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Handle to a running timer loop. `stop` ends it; dropping the handle ends it too.
pub struct SchedulerHandle {
    interval_tx: watch::Sender<Duration>,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn interval(&self) -> Duration {
        *self.interval_tx.borrow()
    }

    /// Re-arms the timer with `interval`, first firing one full interval from now.
    /// The previous timer is replaced, never stacked.
    pub fn set_interval(&self, interval: Duration) {
        self.interval_tx.send_replace(interval);
    }

    /// Cancels the timer and waits for the loop to exit. In-flight cycles settle on their own.
    pub async fn stop(self) {
        let SchedulerHandle {
            interval_tx,
            shutdown_tx,
            task,
        } = self;
        let _ = shutdown_tx.send(());
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "scheduler task join failed");
        }
        drop(interval_tx);
    }
}

/// Spawns the timer loop. The first cycle starts immediately.
pub fn spawn(aggregator: Arc<Aggregator>, interval: Duration) -> SchedulerHandle {
    let (interval_tx, interval_rx) = watch::channel(interval);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(run(aggregator, interval_rx, shutdown_rx));
    SchedulerHandle {
        interval_tx,
        shutdown_tx,
        task,
    }
}

#[instrument(skip_all, name = "scheduler")]
async fn run(
    aggregator: Arc<Aggregator>,
    mut interval_rx: watch::Receiver<Duration>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut period = (*interval_rx.borrow_and_update()).max(MIN_INTERVAL);
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(interval_ms = period.as_millis() as u64, "auto-update started");
    let mut cycle: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                aggregator.record_schedule(true, period, next_cycle_at(period)).await;
                if cycle.as_ref().is_some_and(|c| !c.is_finished()) {
                    debug!("previous refresh cycle still in flight, skipping tick");
                    continue;
                }
                cycle = Some(spawn_cycle(&aggregator));
            }
            changed = interval_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                period = (*interval_rx.borrow_and_update()).max(MIN_INTERVAL);
                tick = interval_at(Instant::now() + period, period);
                tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
                info!(interval_ms = period.as_millis() as u64, "auto-update interval changed");
                aggregator.record_schedule(true, period, next_cycle_at(period)).await;
            }
            _ = &mut shutdown_rx => {
                break;
            }
        }
    }

    aggregator.record_schedule(false, period, None).await;
    info!("auto-update stopped");
}

/// Detached on stop, so an in-flight cycle still settles.
fn spawn_cycle(aggregator: &Arc<Aggregator>) -> JoinHandle<()> {
    let aggregator = aggregator.clone();
    tokio::spawn(async move {
        let snapshot = aggregator.refresh_all().await;
        debug!(
            global_error = snapshot.global_error.as_deref(),
            "refresh cycle settled"
        );
    })
}

fn next_cycle_at(period: Duration) -> Option<DateTime<Utc>> {
    chrono::TimeDelta::from_std(period)
        .ok()
        .and_then(|d| Utc::now().checked_add_signed(d))
}

/// STOPPED/RUNNING state machine owned by one consumer session.
/// Dropping it tears the timer down.
pub struct Scheduler {
    aggregator: Arc<Aggregator>,
    interval: Duration,
    handle: Option<SchedulerHandle>,
}

impl Scheduler {
    /// Starts in `Stopped`.
    pub fn new(aggregator: Arc<Aggregator>, interval: Duration) -> Self {
        Self {
            aggregator,
            interval,
            handle: None,
        }
    }

    /// Starts in `Running` when `auto_update` is set.
    pub fn with_auto_update(
        aggregator: Arc<Aggregator>,
        interval: Duration,
        auto_update: bool,
    ) -> Self {
        let mut scheduler = Self::new(aggregator, interval);
        if auto_update {
            scheduler.start();
        }
        scheduler
    }

    pub fn state(&self) -> SchedulerState {
        if self.handle.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// STOPPED -> RUNNING. Returns false if already running.
    pub fn start(&mut self) -> bool {
        if self.handle.is_some() {
            return false;
        }
        self.handle = Some(spawn(self.aggregator.clone(), self.interval));
        true
    }

    /// RUNNING -> STOPPED. Returns false if already stopped.
    pub async fn stop(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    /// While running, re-arms the timer; while stopped, the interval applies to the next start.
    pub async fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
        match &self.handle {
            Some(handle) => handle.set_interval(interval),
            None => self.aggregator.record_schedule(false, interval, None).await,
        }
    }
}
