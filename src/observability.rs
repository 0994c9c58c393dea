use std::time::Duration;

use opentelemetry::{
    KeyValue,
    global,
    metrics::{
        Counter,
        Histogram,
    },
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use sentry::ClientInitGuard;
use sentry_tracing::EventFilter;
use tracing_subscriber::{
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::{
    OtelConfig,
    SentryConfig,
};

pub fn init_tracing_and_sentry(sentry_config: SentryConfig) -> Option<ClientInitGuard> {
    let guard = if sentry_config.dsn.is_empty() {
        None
    } else {
        Some(sentry::init((
            sentry_config.dsn,
            sentry::ClientOptions {
                release: Some(env!("CARGO_PKG_VERSION").into()),
                ..Default::default()
            },
        )))
    };

    // Logs go to stderr so they never interleave with command output.
    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true);

    let sentry_layer = sentry_tracing::layer().event_filter(|md| match md.level() {
        &tracing::Level::ERROR => EventFilter::Event,
        _ => EventFilter::Ignore,
    });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("hashring=info,ringctl=info")),
        )
        .with(fmt_layer)
        .with(sentry_layer)
        .init();

    guard
}

pub fn init_otel_metrics(otel_config: OtelConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if otel_config.endpoint.is_empty() {
        tracing::info!("No OTEL endpoint configured, skipping metrics initialization");
        return Ok(());
    }

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .with_endpoint(&otel_config.endpoint)
        .build()?;

    let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(
            Resource::builder()
                .with_attributes(vec![KeyValue::new("service.name", "hashring")])
                .build(),
        )
        .build();

    global::set_meter_provider(provider);
    tracing::info!(
        "OpenTelemetry metrics initialized with OTLP exporter endpoint: {}",
        otel_config.endpoint
    );
    Ok(())
}

/// Per-command instruments recorded by the sequencer when a response is
/// delivered. Recording is a no-op until a meter provider is installed.
#[derive(Clone)]
pub struct SequencerMetrics {
    command_counter: Counter<u64>,
    duration_histogram: Histogram<f64>,
}

impl SequencerMetrics {
    pub fn new() -> Self {
        Self {
            command_counter: global::meter("hashring")
                .u64_counter("hashring_commands_total")
                .build(),
            duration_histogram: global::meter("hashring")
                .f64_histogram("hashring_command_duration_seconds")
                .build(),
        }
    }

    pub fn record(&self, command: &'static str, response_kind: &'static str, elapsed: Duration) {
        let attributes = [
            KeyValue::new("command", command),
            KeyValue::new("response", response_kind),
            KeyValue::new("status", response_category(response_kind)),
        ];
        self.duration_histogram
            .record(elapsed.as_secs_f64(), &attributes);
        self.command_counter.add(1, &attributes);
    }
}

impl Default for SequencerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SequencerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequencerMetrics").finish_non_exhaustive()
    }
}

/// Buckets a response kind the way request metrics are usually split.
fn response_category(kind: &str) -> &'static str {
    match kind {
        "ok" | "ring_index" | "binary" | "list" => "ok",
        // Caller errors: bad names, absent nodes, bad arguments
        "ring_not_found" | "node_not_found" | "invalid_argument" => "client_error",
        // Engine errors
        _ => "server_error",
    }
}
