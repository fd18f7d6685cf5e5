//! # Telemetry Features
//!
//! Console logging through `tracing_subscriber::fmt` is always on. On top of
//! it, OpenTelemetry export is opt-in through cargo features.
//!
//! ## Feature matrix
//!
//! - `traces`: Enables OpenTelemetry distributed tracing (via spans).
//! - `metrics`: Enables the OpenTelemetry SDK meter provider, which backs the
//!   `request_duration` histogram and the `errors` counter.
//! - `otlp`: Enables the OTLP/gRPC exporter (`--otlp-endpoint`).
//! - `stdout`: Enables the stdout exporter.
//!
//! ## Feature constraints
//!
//! - Exporters require using at least one of: `traces` or `metrics`.
//! - `metrics` requires at least one exporter: `otlp` or `stdout`.
//! - Both `otlp` and `stdout` exporters can be enabled at the same time.
//!
//! ## Span behavior
//!
//! - Spans created via `#[tracing::instrument]` are exported to any enabled
//!   telemetry backend
//! - Events inside a span become span events in telemetry backends
//! - Events outside of a span are only shown in log output
//!
//! ## Metrics behavior
//!
//! - Without `metrics`, instruments come from the no-op global meter and
//!   recording into them costs nothing. Startup logs a warning in that case
//! - Each exporter (OTLP, stdout) gets its own periodic reader, which runs
//!   independently of request handling
//!
//! ## Example usage
//!
//! Export metrics and spans to a local collector:
//!
//! ```bash
//! cargo run --features traces,metrics,otlp -- --otlp-endpoint http://localhost:4317
//! ```
//!
//! Print metrics to stdout:
//!
//! ```bash
//! cargo run --features metrics,stdout
//! ```

// Disallow using `otlp` without `traces` or `metrics`
#[cfg(all(feature = "otlp", not(any(feature = "traces", feature = "metrics"))))]
compile_error!("The 'otlp' feature requires at least one of 'traces' or 'metrics' to be enabled.");

// Disallow using `stdout` without `traces` or `metrics`
#[cfg(all(feature = "stdout", not(any(feature = "traces", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'traces' or 'metrics' to be enabled."
);

// Disallow a meter provider that has no reader to export through
#[cfg(all(feature = "metrics", not(any(feature = "otlp", feature = "stdout"))))]
compile_error!("The 'metrics' feature requires at least one of 'otlp' or 'stdout' to be enabled.");

use crate::server::config::TelemetryConfig;
use anyhow::Context;
use opentelemetry::InstrumentationScope;
use opentelemetry::metrics::Meter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// OTLP-specific imports
#[cfg(feature = "otlp")]
use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithTonicConfig};
#[cfg(feature = "otlp")]
use tonic::metadata::{MetadataKey, MetadataMap, MetadataValue};
#[cfg(feature = "otlp")]
use tonic::transport::ClientTlsConfig;

// Metrics-specific imports
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;

// Either
#[cfg(any(feature = "metrics", feature = "traces"))]
use opentelemetry::KeyValue;
#[cfg(any(feature = "metrics", feature = "traces"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "traces"))]
use opentelemetry_semantic_conventions as semvcns;

// Tracing-specific imports
#[cfg(feature = "traces")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "traces")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "traces")]
use opentelemetry_sdk::trace as sdktrace;

const SERVICE_NAME: &str = "device-logging";

/// Whether `request_duration` and `errors` leave the process in this build.
pub const fn metrics_exported() -> bool {
    cfg!(all(feature = "metrics", any(feature = "otlp", feature = "stdout")))
}

/// Providers built at startup. `main` owns them and shuts them down after the
/// server has stopped, which flushes whatever the exporters still buffer.
pub struct TelemetryProviders {
    #[cfg(feature = "traces")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Meter for the service's instruments.
    #[cfg(feature = "metrics")]
    pub fn meter(&self) -> Meter {
        use opentelemetry::metrics::MeterProvider;
        self.meter_provider.meter_with_scope(scope())
    }

    /// Meter for the service's instruments (no-op without `metrics`).
    #[cfg(not(feature = "metrics"))]
    pub fn meter(&self) -> Meter {
        opentelemetry::global::meter_with_scope(scope())
    }

    pub fn shutdown(self) {
        #[cfg(feature = "traces")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

fn scope() -> InstrumentationScope {
    let builder =
        InstrumentationScope::builder(SERVICE_NAME).with_version(env!("CARGO_PKG_VERSION"));
    #[cfg(any(feature = "metrics", feature = "traces"))]
    let builder = builder.with_schema_url(semvcns::SCHEMA_URL);
    builder.build()
}

pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "traces")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "traces")]
    let tracer_provider = init_tracer(config)?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics(config)?;

    // Always subscribe to standard tracing logs printed to the console via
    // `tracing_subscriber::fmt`. This is unrelated to the `opentelemetry_stdout`
    // exporter - it logs spans/events as human-readable output.
    let registry = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.default_filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "traces")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope()))
                .with_error_records_to_exceptions(true),
        )
    };

    registry
        .try_init()
        .context("failed to install tracing subscriber")?;

    if !metrics_exported() {
        tracing::warn!(
            "metrics export disabled: `request_duration` and `errors` are recorded \
             into a no-op meter; build with `--features metrics,otlp` (or `stdout`)"
        );
    }

    Ok(TelemetryProviders {
        #[cfg(feature = "traces")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(feature = "otlp")]
struct OtlpSettings {
    endpoint: String,
    metadata: MetadataMap,
    compression: Compression,
    tls: bool,
}

#[cfg(feature = "otlp")]
fn otlp_settings(config: &TelemetryConfig) -> anyhow::Result<OtlpSettings> {
    use std::str::FromStr;

    let endpoint = config
        .otlp_endpoint
        .clone()
        .context("missing `OTLP_ENDPOINT`")?;

    let mut metadata = MetadataMap::new();
    for (name, value) in &config.otlp_headers {
        let key = MetadataKey::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name `{name}`"))?;
        let value = MetadataValue::try_from(value.as_str())
            .with_context(|| format!("invalid value for header `{name}`"))?;
        metadata.insert(key, value);
    }

    let compression = Compression::from_str(&config.otlp_compression)?;
    let tls = endpoint.starts_with("https://");

    Ok(OtlpSettings {
        endpoint,
        metadata,
        compression,
        tls,
    })
}

#[cfg(any(feature = "metrics", feature = "traces"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics(_config: &TelemetryConfig) -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(_config.export_interval)
            .build();

        builder.with_reader(reader)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        let settings = otlp_settings(_config)?;
        let exporter = opentelemetry_otlp::MetricExporter::builder().with_tonic();
        let exporter = if settings.tls {
            exporter.with_tls_config(ClientTlsConfig::new().with_native_roots())
        } else {
            exporter
        };
        let exporter = exporter
            .with_metadata(settings.metadata)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(settings.compression)
            .with_endpoint(settings.endpoint)
            .with_protocol(Protocol::Grpc)
            .build()
            .context("failed to build metrics exporter")?;

        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(_config.export_interval)
            .build();

        builder.with_reader(reader)
    };

    Ok(builder.build())
}

#[cfg(feature = "traces")]
fn init_tracer(_config: &TelemetryConfig) -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::SpanExporter;
        let exporter = SpanExporter::default();
        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();
        builder.with_span_processor(batch)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        let settings = otlp_settings(_config)?;
        let exporter = opentelemetry_otlp::SpanExporter::builder().with_tonic();
        let exporter = if settings.tls {
            exporter.with_tls_config(ClientTlsConfig::new().with_native_roots())
        } else {
            exporter
        };
        let exporter = exporter
            .with_metadata(settings.metadata)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(settings.compression)
            .with_endpoint(settings.endpoint)
            .with_protocol(Protocol::Grpc)
            .build()
            .context("failed to build tracer exporter")?;

        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();

        builder.with_span_processor(batch)
    };

    Ok(builder.build())
}
