//! Log and trace output.
//!
//! Events are written to stdout one per line. OpenTelemetry span export is
//! switched on by the standard `OTEL_EXPORTER_OTLP_*` variables.

use std::io::IsTerminal;

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::SpanExporter;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing::Level;
use tracing_subscriber::{
	layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

const SERVICE_NAME: &str = "nsclass-controller";

/// Line format of the stdout log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
	/// Compact text for people watching a terminal.
	Text,
	/// JSON lines for log collectors.
	Json,
}

impl LogFormat {
	pub fn detect() -> Self {
		if std::io::stdout().is_terminal() {
			LogFormat::Text
		} else {
			LogFormat::Json
		}
	}
}

/// Span export settings taken from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ExportSettings {
	grpc: bool,
	/// Set when `OTEL_SERVICE_NAME` does not provide one.
	fallback_service_name: Option<&'static str>,
}

impl ExportSettings {
	fn from_env(var: impl Fn(&str) -> Option<String>) -> Option<Self> {
		let configured = var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_ENDPOINT).is_some()
			|| var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_TRACES_ENDPOINT).is_some();
		if !configured {
			return None;
		}
		let protocol = var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL);
		Some(Self {
			grpc: protocol
				.as_deref()
				.unwrap_or(opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL_DEFAULT)
				== "grpc",
			fallback_service_name: var("OTEL_SERVICE_NAME")
				.is_none()
				.then_some(SERVICE_NAME),
		})
	}
}

/// Keeps span export alive; flushes pending spans when dropped.
pub struct TelemetryGuard {
	provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
	fn drop(&mut self) {
		let Some(provider) = self.provider.take() else {
			return;
		};
		if let Err(e) = provider.shutdown() {
			eprintln!("failed to flush traces: {e}");
		}
	}
}

/// `level` wins over `RUST_LOG`; without either, info and above are logged.
fn env_filter(level: Option<Level>) -> EnvFilter {
	let Some(level) = level else {
		return EnvFilter::builder()
			.with_default_directive(Level::INFO.into())
			.from_env_lossy();
	};
	EnvFilter::new(level.as_str())
}

fn stdout_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
	S: tracing::Subscriber + for<'span> LookupSpan<'span>,
{
	let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);
	match format {
		LogFormat::Text => layer.compact().boxed(),
		LogFormat::Json => layer.json().with_current_span(true).boxed(),
	}
}

fn tracer_provider(settings: &ExportSettings) -> Result<SdkTracerProvider> {
	let exporter = if settings.grpc {
		SpanExporter::builder().with_tonic().build()
	} else {
		SpanExporter::builder().with_http().build()
	}
	.context("building OTLP span exporter")?;

	// The builder also reads OTEL_SERVICE_NAME and OTEL_RESOURCE_ATTRIBUTES.
	let mut resource = Resource::builder();
	if let Some(name) = settings.fallback_service_name {
		resource = resource.with_service_name(name);
	}

	Ok(SdkTracerProvider::builder()
		.with_resource(resource.build())
		.with_batch_exporter(exporter)
		.build())
}

/// Install the global subscriber.
pub fn init(level: Option<Level>) -> Result<TelemetryGuard> {
	let registry = tracing_subscriber::registry()
		.with(env_filter(level))
		.with(stdout_layer(LogFormat::detect()));

	let Some(settings) = ExportSettings::from_env(|key| std::env::var(key).ok()) else {
		registry.try_init().context("installing tracing subscriber")?;
		return Ok(TelemetryGuard { provider: None });
	};

	let provider = tracer_provider(&settings)?;
	let otel = tracing_opentelemetry::layer()
		.with_error_records_to_exceptions(true)
		.with_tracer(provider.tracer(SERVICE_NAME));
	opentelemetry::global::set_tracer_provider(provider.clone());

	registry
		.with(otel)
		.try_init()
		.context("installing tracing subscriber")?;

	Ok(TelemetryGuard {
		provider: Some(provider),
	})
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use super::*;

	fn settings(vars: &[(&str, &str)]) -> Option<ExportSettings> {
		let vars: HashMap<String, String> = vars
			.iter()
			.map(|(k, v)| ((*k).to_string(), (*v).to_string()))
			.collect();
		ExportSettings::from_env(|key| vars.get(key).cloned())
	}

	#[test]
	fn test_export_disabled_without_endpoint() {
		assert_eq!(settings(&[("OTEL_SERVICE_NAME", "x")]), None);
	}

	#[test]
	fn test_export_defaults() {
		let s = settings(&[("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4318")]).unwrap();
		assert_eq!(s.fallback_service_name, Some(SERVICE_NAME));
	}

	#[test]
	fn test_export_respects_env() {
		let s = settings(&[
			("OTEL_EXPORTER_OTLP_TRACES_ENDPOINT", "http://collector:4317"),
			("OTEL_EXPORTER_OTLP_PROTOCOL", "grpc"),
			("OTEL_SERVICE_NAME", "nsclass-staging"),
		])
		.unwrap();
		assert!(s.grpc);
		assert_eq!(s.fallback_service_name, None);
	}

	#[test]
	fn test_explicit_level_wins() {
		assert_eq!(env_filter(Some(Level::DEBUG)).to_string(), "debug");
	}
}
