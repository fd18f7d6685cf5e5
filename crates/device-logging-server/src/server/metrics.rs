use core::time::Duration;
use device_logging_core::metrics::{MetricsSink, OpLabels};
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Histogram boundaries in seconds, from 5ms to 10s.
const DURATION_BOUNDARIES: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// [`MetricsSink`] backed by OpenTelemetry instruments.
///
/// Built once at startup from the service meter and shared by every request
/// through an `Arc`. Recording never blocks; export happens on the meter
/// provider's own reader.
pub struct OtelMetrics {
    duration: Histogram<f64>,
    errors: Counter<u64>,
}

impl OtelMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            duration: meter
                .f64_histogram("request_duration")
                .with_unit("s")
                .with_description("Duration of gRPC or DB requests in seconds")
                .with_boundaries(DURATION_BOUNDARIES.to_vec())
                .build(),
            errors: meter
                .u64_counter("errors")
                .with_description("Count of errors by operation and backend")
                .build(),
        }
    }
}

fn attributes(labels: OpLabels) -> [KeyValue; 2] {
    [
        KeyValue::new("op", labels.op),
        KeyValue::new("db", labels.db),
    ]
}

impl MetricsSink for OtelMetrics {
    fn observe_duration(&self, labels: OpLabels, elapsed: Duration) {
        self.duration
            .record(elapsed.as_secs_f64(), &attributes(labels));
    }

    fn increment_errors(&self, labels: OpLabels) {
        self.errors.add(1, &attributes(labels));
    }
}
