//! Write-only telemetry seam for storage operations.
//!
//! The registration writer and the gRPC handler report through a
//! [`MetricsSink`] handed to them at construction. The sink decides where the
//! samples go (OpenTelemetry instruments in the server binary, mocks in
//! tests); callers never wait on export.

use core::time::Duration;

/// Operation label for a device insert.
pub const OP_INSERT: &str = "insert";

/// The `{op, db}` label pair every storage sample is keyed by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OpLabels {
    pub op: &'static str,
    pub db: &'static str,
}

impl OpLabels {
    pub const fn new(op: &'static str, db: &'static str) -> Self {
        Self { op, db }
    }

    /// Labels for an insert against the named backend.
    pub const fn insert(db: &'static str) -> Self {
        Self::new(OP_INSERT, db)
    }
}

/// Destination for storage duration samples and error counts.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait MetricsSink: Send + Sync {
    /// Records one wall-clock duration sample.
    fn observe_duration(&self, labels: OpLabels, elapsed: Duration);

    /// Increments the error counter by one.
    fn increment_errors(&self, labels: OpLabels);
}
