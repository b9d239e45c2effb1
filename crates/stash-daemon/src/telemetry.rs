use std::env;

use anyhow::{Context, Result};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    resource::Resource,
    runtime::Tokio,
    trace::{self as sdktrace, Sampler},
};
use tracing::{info, warn, Subscriber};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter,
};

pub const SAMPLING_RATE_ENV: &str = "STASH_OTEL_SAMPLING_RATE";

/// Flushes the OTLP pipeline when dropped.
#[derive(Debug)]
pub struct TelemetryGuard {
    otel_enabled: bool,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.otel_enabled {
            global::shutdown_tracer_provider();
        }
    }
}

/// Trace sampling ratio plus a warning when the configured value was unusable.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingRate {
    pub ratio: f64,
    pub warning: Option<String>,
}

impl Default for SamplingRate {
    fn default() -> Self {
        Self {
            ratio: 1.0,
            warning: None,
        }
    }
}

impl SamplingRate {
    /// `None` samples everything; out-of-range numbers are clamped and
    /// anything unparsable falls back to 1.0.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim) else {
            return Self::default();
        };
        match raw.parse::<f64>() {
            Ok(ratio) if (0.0..=1.0).contains(&ratio) => Self {
                ratio,
                warning: None,
            },
            Ok(ratio) if ratio.is_finite() => {
                let clamped = ratio.clamp(0.0, 1.0);
                Self {
                    ratio: clamped,
                    warning: Some(format!("{SAMPLING_RATE_ENV}={raw} clamped to {clamped}")),
                }
            }
            _ => Self {
                ratio: 1.0,
                warning: Some(format!(
                    "{SAMPLING_RATE_ENV}='{raw}' is not a ratio between 0.0 and 1.0; sampling everything"
                )),
            },
        }
    }
}

/// Installs the global subscriber: env filter (default `info`), console
/// output, and an OTLP exporter unless sampling is disabled.
pub fn init(service_name: &str) -> Result<TelemetryGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let sampling = SamplingRate::parse(env::var(SAMPLING_RATE_ENV).ok().as_deref());

    let (otel, otel_error) = match otel_layer(service_name, sampling.ratio) {
        Ok(layer) => (layer, None),
        Err(error) => (None, Some(error)),
    };
    let otel_enabled = otel.is_some();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(otel)
        .try_init()
        .context("installing tracing subscriber")?;

    if let Some(message) = sampling.warning {
        warn!("{message}");
    }
    if let Some(error) = otel_error {
        warn!(%error, "OTLP exporter unavailable; logging to console only");
    }
    info!(
        service = service_name,
        sampling_ratio = sampling.ratio,
        otel_enabled,
        "telemetry initialized"
    );

    Ok(TelemetryGuard { otel_enabled })
}

fn otel_layer<S>(
    service_name: &str,
    ratio: f64,
) -> Result<Option<OpenTelemetryLayer<S, sdktrace::Tracer>>>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    if ratio <= 0.0 {
        return Ok(None);
    }

    global::set_text_map_propagator(TraceContextPropagator::new());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().tonic())
        .with_trace_config(
            sdktrace::Config::default()
                .with_sampler(Sampler::TraceIdRatioBased(ratio))
                .with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    service_name.to_string(),
                )])),
        )
        .install_batch(Tokio)
        .context("building OTLP trace pipeline")?;

    Ok(Some(tracing_opentelemetry::layer().with_tracer(tracer)))
}
