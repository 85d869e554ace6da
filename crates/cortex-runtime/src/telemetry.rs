//! Tracing and OpenTelemetry initialisation for Cortex.
//!
//! Call [`init_tracing`] once at process startup to wire up the `tracing`
//! subscriber with an optional OTLP span exporter.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP collector base URL (e.g. `http://localhost:4318`). When set the OTLP HTTP exporter is activated. |
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `CORTEX_LOG_FORMAT=json` | Emit newline-delimited JSON logs, overriding the configured format. |
//!
//! # Example
//!
//! ```rust,no_run
//! use cortex_runtime::telemetry::{init_tracing, LogFormat};
//!
//! // Hold the guard for the entire lifetime of the process.
//! let _guard = init_tracing("cortex", LogFormat::Compact);
//! ```

use std::fmt;
use std::str::FromStr;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use serde::{Deserialize, Serialize};
use tracing::warn;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable overriding the configured [`LogFormat`].
pub const LOG_FORMAT_ENV: &str = "CORTEX_LOG_FORMAT";

/// Console log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    /// `CORTEX_LOG_FORMAT` if it holds a valid format, otherwise `configured`.
    pub fn from_env_or(configured: LogFormat) -> LogFormat {
        std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(configured)
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}' (expected compact or json)")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Compact => f.write_str("compact"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// Environment variable naming the OTLP collector base URL.
const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Install the global `tracing` subscriber for `service_name`.
///
/// The console layer uses `format` unless `CORTEX_LOG_FORMAT` overrides it.
/// When `OTEL_EXPORTER_OTLP_ENDPOINT` is set, spans (including the per-tick
/// `#[instrument]` spans of the behavior system and the intent component)
/// are also exported over OTLP/HTTP under a tracer named after the service.
///
/// Hold the returned guard until exit; dropping it flushes pending spans.
pub fn init_tracing(service_name: &str, format: LogFormat) -> TracerProviderGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let provider = std::env::var(OTLP_ENDPOINT_ENV)
        .ok()
        .and_then(|endpoint| build_provider(service_name, endpoint));

    let otel_layer = provider.as_ref().map(|p| {
        tracing_opentelemetry::layer().with_tracer(p.tracer(service_name.to_string()))
    });
    let console_layer = match LogFormat::from_env_or(format) {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer().compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(console_layer)
        .init();

    TracerProviderGuard {
        service: service_name.to_string(),
        provider,
    }
}

/// Keeps the span exporter alive; shuts it down on drop.
pub struct TracerProviderGuard {
    service: String,
    provider: Option<SdkTracerProvider>,
}

impl TracerProviderGuard {
    /// Whether spans are being exported to a collector.
    pub fn is_exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        let Some(provider) = self.provider.take() else {
            return;
        };
        if let Err(e) = provider.shutdown() {
            warn!(service = %self.service, error = %e, "span exporter did not shut down cleanly");
        }
    }
}

/// Exporter for `endpoint`, or `None` if it cannot be built. The error goes
/// to stderr since the subscriber is not installed yet.
///
/// The tick thread builds its Tokio runtime after tracing is up, so the
/// simple (non-batching) processor is used: it never spawns tasks.
fn build_provider(service_name: &str, endpoint: String) -> Option<SdkTracerProvider> {
    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint.as_str())
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("[{service_name}] OTLP exporter for {endpoint} failed to start: {e}");
            return None;
        }
    };

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}
