// Deterministic mock backend: the dashboard's glucose/insulin/patterns/summary/discovery
// endpoints. Values derive from the calendar date, so repeated calls on one day agree.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
};
use bytes::Bytes;
use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, Utc};
use serde::Deserialize;

use crate::models::{
    ApiEnvelope, DashboardSummary, DetectedPattern, DiscoveryRun, GlucoseReading, InsulinDose,
    PatternKind,
};

pub const DEFAULT_DAYS: u32 = 7;
pub const MAX_DAYS: u32 = 90;

/// mg/dL
const RANGE_LOW: u32 = 70;
const RANGE_HIGH: u32 = 180;
/// Mean glucose at which GMI reaches 7%.
const ELEVATED_AVERAGE: f64 = 154.0;
const TREND_THRESHOLD: f64 = 10.0;

/// How long clients should wait before refetching.
const REFRESH_HINT: TimeDelta = TimeDelta::hours(1);

fn day_seed(date: NaiveDate) -> u32 {
    date.num_days_from_ce().unsigned_abs()
}

fn dates_ending(today: NaiveDate, days: u32) -> impl Iterator<Item = NaiveDate> {
    (0..days).rev().map(move |back| today - TimeDelta::days(back as i64))
}

/// One reading per day, oldest first, 60..=199 mg/dL.
pub fn glucose_readings(today: NaiveDate, days: u32) -> Vec<GlucoseReading> {
    dates_ending(today, days)
        .map(|date| GlucoseReading {
            date,
            value: 60 + (day_seed(date).wrapping_mul(37) % 140),
        })
        .collect()
}

/// Daily basal/bolus totals, oldest first.
pub fn insulin_doses(today: NaiveDate, days: u32) -> Vec<InsulinDose> {
    dates_ending(today, days)
        .map(|date| {
            let seed = day_seed(date);
            InsulinDose {
                date,
                basal_units: 18.0 + (seed % 5) as f64 * 0.5,
                bolus_units: 12.0 + (seed.wrapping_mul(13) % 9) as f64,
            }
        })
        .collect()
}

fn mean(values: impl Iterator<Item = u32>) -> Option<f64> {
    let (sum, n) = values.fold((0u64, 0u64), |(s, n), v| (s + v as u64, n + 1));
    (n > 0).then(|| sum as f64 / n as f64)
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Rule-based pattern detection over chronologically ordered readings.
pub fn detect_patterns(readings: &[GlucoseReading]) -> Vec<DetectedPattern> {
    let Some(first) = readings.first() else {
        return Vec::new();
    };
    let mut patterns = Vec::new();
    let len = readings.len() as f64;

    if let Some(avg) = mean(readings.iter().map(|r| r.value))
        && avg > ELEVATED_AVERAGE
    {
        patterns.push(DetectedPattern {
            kind: PatternKind::ElevatedAverage,
            description: format!("Average glucose {:.1} mg/dL is above target", avg),
            confidence: round1((0.5 + (avg - ELEVATED_AVERAGE) / 50.0).min(1.0)),
            first_seen: first.date,
        });
    }

    let highs: Vec<&GlucoseReading> = readings.iter().filter(|r| r.value > RANGE_HIGH).collect();
    if highs.len() >= 2 {
        patterns.push(DetectedPattern {
            kind: PatternKind::HyperglycemiaEpisodes,
            description: format!("{} readings above {} mg/dL", highs.len(), RANGE_HIGH),
            confidence: round1(highs.len() as f64 / len),
            first_seen: highs[0].date,
        });
    }

    if let Some(low) = readings.iter().find(|r| r.value < RANGE_LOW) {
        let lows = readings.iter().filter(|r| r.value < RANGE_LOW).count();
        patterns.push(DetectedPattern {
            kind: PatternKind::HypoglycemiaRisk,
            description: format!("{} readings below {} mg/dL", lows, RANGE_LOW),
            confidence: round1((0.6 + lows as f64 / len).min(1.0)),
            first_seen: low.date,
        });
    }

    if readings.len() >= 4 {
        let (early, late) = readings.split_at(readings.len() / 2);
        if let (Some(a), Some(b)) = (
            mean(early.iter().map(|r| r.value)),
            mean(late.iter().map(|r| r.value)),
        ) {
            let diff = b - a;
            let kind = if diff > TREND_THRESHOLD {
                Some(PatternKind::RisingTrend)
            } else if diff < -TREND_THRESHOLD {
                Some(PatternKind::FallingTrend)
            } else {
                None
            };
            if let Some(kind) = kind {
                patterns.push(DetectedPattern {
                    kind,
                    description: format!("Average moved {:+.1} mg/dL over the period", diff),
                    confidence: round1((diff.abs() / 50.0).min(1.0)),
                    first_seen: late[0].date,
                });
            }
        }
    }

    patterns
}

pub fn summarize(
    readings: &[GlucoseReading],
    doses: &[InsulinDose],
    patterns_detected: usize,
) -> DashboardSummary {
    let in_range = readings
        .iter()
        .filter(|r| (RANGE_LOW..=RANGE_HIGH).contains(&r.value))
        .count();
    let time_in_range_percent = if readings.is_empty() {
        0.0
    } else {
        round1(in_range as f64 * 100.0 / readings.len() as f64)
    };
    DashboardSummary {
        readings_count: readings.len(),
        average_glucose: round1(mean(readings.iter().map(|r| r.value)).unwrap_or(0.0)),
        time_in_range_percent,
        total_insulin_units: round1(doses.iter().map(InsulinDose::total_units).sum()),
        patterns_detected,
    }
}

#[derive(Clone, Default)]
struct MockState {
    discovery_runs: Arc<AtomicU64>,
}

#[derive(Debug, Deserialize)]
struct RangeQuery {
    days: Option<u32>,
}

impl RangeQuery {
    fn days(&self) -> u32 {
        self.days.unwrap_or(DEFAULT_DAYS).clamp(1, MAX_DAYS)
    }
}

#[derive(Debug, Default, Deserialize)]
struct DiscoveryRequest {
    focus: Option<String>,
}

fn envelope<T>(data: T, now: DateTime<Utc>) -> Json<ApiEnvelope<T>> {
    Json(ApiEnvelope::ok(data).with_timestamps(Some(now), now.checked_add_signed(REFRESH_HINT)))
}

/// Routes under /api/mock. Merge into the main router when enabled.
pub fn router() -> Router {
    Router::new()
        .route("/api/mock/glucose", get(glucose_handler))
        .route("/api/mock/insulin", get(insulin_handler))
        .route("/api/mock/patterns", get(patterns_handler))
        .route("/api/mock/summary", get(summary_handler))
        .route("/api/mock/discovery", post(discovery_handler))
        .with_state(MockState::default())
}

async fn glucose_handler(Query(q): Query<RangeQuery>) -> Json<ApiEnvelope<Vec<GlucoseReading>>> {
    let now = Utc::now();
    envelope(glucose_readings(now.date_naive(), q.days()), now)
}

async fn insulin_handler(Query(q): Query<RangeQuery>) -> Json<ApiEnvelope<Vec<InsulinDose>>> {
    let now = Utc::now();
    envelope(insulin_doses(now.date_naive(), q.days()), now)
}

async fn patterns_handler(
    Query(q): Query<RangeQuery>,
) -> Json<ApiEnvelope<Vec<DetectedPattern>>> {
    let now = Utc::now();
    let readings = glucose_readings(now.date_naive(), q.days());
    envelope(detect_patterns(&readings), now)
}

async fn summary_handler(Query(q): Query<RangeQuery>) -> Json<ApiEnvelope<DashboardSummary>> {
    let now = Utc::now();
    let today = now.date_naive();
    let readings = glucose_readings(today, q.days());
    let doses = insulin_doses(today, q.days());
    let patterns = detect_patterns(&readings);
    envelope(summarize(&readings, &doses, patterns.len()), now)
}

/// Body is optional; an empty body means no focus.
async fn discovery_handler(
    State(state): State<MockState>,
    body: Bytes,
) -> (StatusCode, Json<ApiEnvelope<DiscoveryRun>>) {
    let request = if body.is_empty() {
        DiscoveryRequest::default()
    } else {
        match serde_json::from_slice::<DiscoveryRequest>(&body) {
            Ok(r) => r,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ApiEnvelope::failure(format!("invalid discovery request: {}", e))),
                );
            }
        }
    };
    let run = state.discovery_runs.fetch_add(1, Ordering::Relaxed) + 1;
    let now = Utc::now();
    tracing::debug!(run, focus = ?request.focus, "discovery run queued");
    let data = DiscoveryRun {
        run_id: format!("run-{}", run),
        status: "queued".into(),
        focus: request.focus,
        requested_at: now,
    };
    (StatusCode::ACCEPTED, envelope(data, now))
}
