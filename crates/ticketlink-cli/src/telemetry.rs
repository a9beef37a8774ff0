//! Tracing subscriber setup.
//!
//! Logs go to stderr so stdout stays reserved for command output. The filter
//! comes from `TICKETLINK_LOG`, then `RUST_LOG`, then defaults to `warn`. With
//! the `otel` feature and `OTEL_EXPORTER_OTLP_ENDPOINT` set, spans are also
//! exported over OTLP/HTTP.

use std::io;

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub const LOG_ENV: &str = "TICKETLINK_LOG";
const DEFAULT_DIRECTIVE: &str = "warn";

/// Flushes exporters when dropped.
pub struct TelemetryGuard {
    #[cfg(feature = "otel")]
    provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        #[cfg(feature = "otel")]
        if let Some(provider) = self.provider.take() {
            if let Err(err) = provider.shutdown() {
                eprintln!("Failed to flush traces: {err}");
            }
        }
    }
}

fn env_filter() -> EnvFilter {
    directive_from(std::env::var(LOG_ENV).ok(), std::env::var("RUST_LOG").ok())
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}

fn directive_from(primary: Option<String>, fallback: Option<String>) -> Option<String> {
    primary
        .filter(|v| !v.trim().is_empty())
        .or_else(|| fallback.filter(|v| !v.trim().is_empty()))
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if a subscriber is already installed or the exporter
/// cannot be built.
pub fn init(log_json: bool) -> Result<TelemetryGuard> {
    let fmt_layer = if log_json {
        fmt::layer().json().with_writer(io::stderr).boxed()
    } else {
        fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .boxed()
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer);

    #[cfg(feature = "otel")]
    let guard = {
        use opentelemetry::trace::TracerProvider as _;

        let provider = otel::provider()?;
        let otel_layer = provider
            .as_ref()
            .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("ticketlink")));
        registry
            .with(otel_layer)
            .try_init()
            .context("Failed to install tracing subscriber")?;
        TelemetryGuard { provider }
    };

    #[cfg(not(feature = "otel"))]
    let guard = {
        registry
            .try_init()
            .context("Failed to install tracing subscriber")?;
        TelemetryGuard {}
    };

    Ok(guard)
}

#[cfg(feature = "otel")]
mod otel {
    use anyhow::{Context, Result};
    use opentelemetry_otlp::{SpanExporter, WithExportConfig as _};
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use opentelemetry_sdk::Resource;

    const ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

    /// Build a tracer provider if an OTLP endpoint is configured.
    pub fn provider() -> Result<Option<SdkTracerProvider>> {
        let Ok(endpoint) = std::env::var(ENDPOINT_ENV) else {
            return Ok(None);
        };

        let exporter = SpanExporter::builder()
            .with_http()
            .with_endpoint(format!("{}/v1/traces", endpoint.trim_end_matches('/')))
            .build()
            .context("Failed to build OTLP span exporter")?;

        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(Resource::builder().with_service_name("ticketlink").build())
            .build();
        Ok(Some(provider))
    }
}
