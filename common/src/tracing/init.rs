use crate::error::{AskJsonError, Result};
use opentelemetry::{trace::TracerProvider as _, KeyValue};
use opentelemetry_sdk::Resource;
use std::env;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const ENABLE_TRACING_ENV: &str = "ASKJSON_ENABLE_TRACING";

/// flushes exported spans when dropped; hold it for the life of the process
pub struct OtelGuard {
    tracer_provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

impl OtelGuard {
    pub fn is_exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("error shutting down tracer provider: {}", e);
            }
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn otlp_endpoint() -> Option<String> {
    env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .or_else(|_| env::var("PHOENIX_COLLECTOR_ENDPOINT"))
        .ok()
        .filter(|e| !e.trim().is_empty())
}

/// `RUST_LOG` wins over `default_level`
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// install the global subscriber: fmt logging always, otlp export when
/// `ASKJSON_ENABLE_TRACING` is truthy and an endpoint is configured
pub fn init_tracing(service_name: &str, default_level: &str) -> Result<OtelGuard> {
    let enabled = env::var(ENABLE_TRACING_ENV)
        .map(|v| is_truthy(&v))
        .unwrap_or(false);

    let endpoint = match (enabled, otlp_endpoint()) {
        (true, Some(endpoint)) => endpoint,
        (enabled, _) => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(env_filter(default_level))
                .finish()
                .try_init()
                .map_err(|e| AskJsonError::Tracing(e.to_string()))?;

            if enabled {
                tracing::warn!("{} is set but no otlp endpoint is configured", ENABLE_TRACING_ENV);
            }
            tracing::debug!(service = service_name, "logging initialized");

            return Ok(OtelGuard {
                tracer_provider: None,
            });
        }
    };

    use opentelemetry_otlp::WithExportConfig;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .build()
        .map_err(|e| AskJsonError::Tracing(format!("exporter build failed: {}", e)))?;

    let resource = Resource::builder_empty()
        .with_attribute(KeyValue::new("service.name", service_name.to_string()))
        .build();

    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();

    let telemetry =
        tracing_opentelemetry::layer().with_tracer(provider.tracer(service_name.to_string()));

    tracing_subscriber::registry()
        .with(telemetry)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter(default_level))
        .try_init()
        .map_err(|e| AskJsonError::Tracing(e.to_string()))?;

    tracing::info!(
        "opentelemetry tracing initialized for {} (endpoint: {})",
        service_name,
        endpoint
    );

    Ok(OtelGuard {
        tracer_provider: Some(provider),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_truthy() {
        assert!(is_truthy("1"));
        assert!(is_truthy(" TRUE "));
        assert!(is_truthy("on"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("nope"));
    }

    #[test]
    fn test_second_init_is_an_error_not_a_panic() {
        let _guard = init_tracing("test", "warn");
        let second = init_tracing("test", "warn");

        assert!(matches!(second, Err(AskJsonError::Tracing(_))));
    }
}
