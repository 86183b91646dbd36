//! Tracing initialisation for the bridge process.
//!
//! Call [`init_tracing`] once at process startup, before the Tokio runtime is
//! built, and hold the returned guard until exit.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP collector base URL (e.g. `http://localhost:4318`). When set, spans are exported over OTLP/HTTP. |
//! | `RUST_LOG` | Log filter (default `"info"`, or `"debug"` with `--debug`). |
//! | `AIRBRIDGE_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//!
//! ```rust,no_run
//! let _guard = airbridge_runtime::telemetry::init_tracing("airbridge", false);
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FORMAT_VAR: &str = "AIRBRIDGE_LOG_FORMAT";

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `debug`; without either the filter is `info`.  The
/// OTel layer is added only when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
pub fn init_tracing(service_name: &str, debug: bool) -> TracerProviderGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(debug)));
    let use_json = std::env::var(LOG_FORMAT_VAR).as_deref() == Ok("json");

    let provider = build_provider(service_name);

    if let Some(ref p) = provider {
        let tracer = p.tracer("airbridge");
        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        if use_json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(otel_layer)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(otel_layer)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
    } else if use_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .init();
    }

    TracerProviderGuard(provider)
}

fn default_level(debug: bool) -> &'static str {
    if debug { "debug" } else { "info" }
}

// ─────────────────────────────────────────────────────────────────────────────
// RAII guard
// ─────────────────────────────────────────────────────────────────────────────

/// Shuts the OTel [`SdkTracerProvider`] down on drop, flushing pending spans.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[airbridge] OpenTelemetry provider shutdown error: {e}");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ─────────────────────────────────────────────────────────────────────────────

/// `None` when the endpoint variable is absent or the exporter fails to build.
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[airbridge] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            // The subscriber is installed before any Tokio runtime exists, so
            // the batch exporter (which spawns tasks) cannot be used.
            .with_simple_exporter(exporter)
            .build(),
    )
}
