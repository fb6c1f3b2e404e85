// T1D dashboard payloads served by the mock backend

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Daily glucose reading in mg/dL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseReading {
    pub date: NaiveDate,
    pub value: u32,
}

/// Daily insulin totals in units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsulinDose {
    pub date: NaiveDate,
    pub basal_units: f64,
    pub bolus_units: f64,
}

impl InsulinDose {
    pub fn total_units(&self) -> f64 {
        self.basal_units + self.bolus_units
    }
}

/// Pattern kind; serializes to snake_case JSON (e.g. "rising_trend").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    ElevatedAverage,
    HyperglycemiaEpisodes,
    HypoglycemiaRisk,
    RisingTrend,
    FallingTrend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedPattern {
    pub kind: PatternKind,
    pub description: String,
    /// 0.0..=1.0
    pub confidence: f64,
    pub first_seen: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub readings_count: usize,
    pub average_glucose: f64,
    pub time_in_range_percent: f64,
    pub total_insulin_units: f64,
    pub patterns_detected: usize,
}

/// Result of triggering a discovery run (POST category).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRun {
    pub run_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,
    pub requested_at: DateTime<Utc>,
}
