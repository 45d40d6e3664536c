use crate::{Environment, LogLevel, logging};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry_otlp::{MetricExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
    propagation::TraceContextPropagator,
    trace::{Sampler, SdkTracerProvider},
};
use opentelemetry_semantic_conventions::attribute::{SERVICE_NAME, SERVICE_VERSION};
use std::time::Duration;

/// Where and how often detection telemetry is pushed.
#[derive(Debug, Clone)]
pub struct OtlpExport<'a> {
    pub service_name: &'a str,
    /// gRPC collector address, e.g. `http://localhost:4317`.
    pub endpoint: &'a str,
    /// Period of the metric reader. Usually the metrics sampler cadence.
    pub metrics_interval: Duration,
}

/// Owns the OTLP span and metric pipelines; both are flushed on drop.
///
/// ```ignore
/// let _telemetry = TelemetryGuard::init(
///     OtlpExport {
///         service_name: "gateway",
///         endpoint: "http://localhost:4317",
///         metrics_interval: Duration::from_secs(1),
///     },
///     LogLevel::Info,
///     Environment::Production,
/// )?;
/// ```
pub struct TelemetryGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl TelemetryGuard {
    /// Register global providers, then install the subscriber with the
    /// tracing-to-OTel bridge so `detection_iteration` and `load_model`
    /// spans reach the collector.
    pub fn init(
        export: OtlpExport<'_>,
        level: LogLevel,
        environment: Environment,
    ) -> anyhow::Result<Self> {
        global::set_text_map_propagator(TraceContextPropagator::new());

        let resource = service_resource(export.service_name);
        let tracer_provider = tracer_provider(&export, resource.clone())?;
        let meter_provider = meter_provider(&export, resource)?;

        global::set_tracer_provider(tracer_provider.clone());
        global::set_meter_provider(meter_provider.clone());

        let tracer = global::tracer(export.service_name.to_string());
        logging::install(level, environment, tracing_opentelemetry::layer().with_tracer(tracer));

        tracing::info!(
            endpoint = export.endpoint,
            interval_ms = export.metrics_interval.as_millis() as u64,
            "OTLP export enabled"
        );

        Ok(Self {
            tracer_provider,
            meter_provider,
        })
    }
}

fn service_resource(service_name: &str) -> Resource {
    Resource::builder()
        .with_attributes([
            KeyValue::new(SERVICE_NAME, service_name.to_string()),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        ])
        .build()
}

fn tracer_provider(export: &OtlpExport<'_>, resource: Resource) -> anyhow::Result<SdkTracerProvider> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(export.endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
        .with_batch_exporter(exporter)
        .build())
}

fn meter_provider(export: &OtlpExport<'_>, resource: Resource) -> anyhow::Result<SdkMeterProvider> {
    let exporter = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(export.endpoint)
        .build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(export.metrics_interval.max(Duration::from_secs(1)))
        .build();

    Ok(SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build())
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        // The subscriber may already be gone, so report on stderr.
        if let Err(e) = self.tracer_provider.shutdown() {
            eprintln!("span export did not flush: {e:?}");
        }
        if let Err(e) = self.meter_provider.shutdown() {
            eprintln!("metric export did not flush: {e:?}");
        }
    }
}

/// Enter an info-level span for the rest of the scope.
#[macro_export]
macro_rules! span {
    ($name:literal) => {
        tracing::info_span!($name).entered()
    };
}
