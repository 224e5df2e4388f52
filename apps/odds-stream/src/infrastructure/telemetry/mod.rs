//! Tracing Setup
//!
//! Installs a `tracing-subscriber` registry with an env filter and a fmt
//! layer, plus an OpenTelemetry OTLP layer when enabled.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Extra filter directives (default adds `odds_stream=info`)
//! - `OTEL_ENABLED`: Set to "true" to export spans (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: odds-stream)

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_SERVICE_NAME: &str = "odds-stream";

const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Guard that shuts down OpenTelemetry when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shutdown OpenTelemetry tracer provider: {e}");
        }
    }
}

impl std::fmt::Debug for TelemetryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryGuard")
            .field("otel", &self.tracer_provider.is_some())
            .finish()
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Whether span export is enabled.
    pub enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// Service name for traces.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            enabled: lookup("OTEL_ENABLED").is_some_and(|v| v.eq_ignore_ascii_case("true")),
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or(defaults.otlp_endpoint),
            service_name: lookup("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
        }
    }
}

/// Initialize telemetry from the environment.
///
/// Keep the returned guard alive for the life of the program.
#[must_use]
pub fn init() -> TelemetryGuard {
    init_with_config(&TelemetryConfig::from_env())
}

/// Initialize telemetry with an explicit configuration.
///
/// Falls back to log-only output if the OTLP exporter cannot be built.
#[must_use]
#[allow(clippy::expect_used)]
pub fn init_with_config(config: &TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::from_default_env()
        .add_directive(
            "odds_stream=info"
                .parse()
                .expect("static directive 'odds_stream=info' is valid"),
        )
        .add_directive(
            "hyper=warn"
                .parse()
                .expect("static directive 'hyper=warn' is valid"),
        )
        .add_directive(
            "tungstenite=warn"
                .parse()
                .expect("static directive 'tungstenite=warn' is valid"),
        );

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let exporter = if config.enabled {
        match opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&config.otlp_endpoint)
            .build()
        {
            Ok(exporter) => Some(exporter),
            Err(e) => {
                eprintln!("OTLP exporter unavailable, continuing without span export: {e}");
                None
            }
        }
    } else {
        None
    };

    let Some(exporter) = exporter else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
        return TelemetryGuard {
            tracer_provider: None,
        };
    };

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build();

    let tracer = tracer_provider.tracer(config.service_name.clone());
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    TelemetryGuard {
        tracer_provider: Some(tracer_provider),
    }
}
