// Wire and snapshot models

mod envelope;
mod readings;
mod snapshot;

pub use envelope::ApiEnvelope;
pub use readings::{
    DashboardSummary, DetectedPattern, DiscoveryRun, GlucoseReading, InsulinDose, PatternKind,
};
pub use snapshot::{AggregatorSnapshot, CategoryError, SlotPhase, SlotSnapshot};
