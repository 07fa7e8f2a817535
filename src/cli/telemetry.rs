use anyhow::{anyhow, Context, Result};
use once_cell::sync::OnceCell;
use opentelemetry::{
    global, propagation::TextMapCompositePropagator, trace::TracerProvider as _, KeyValue,
};
use opentelemetry_otlp::{Compression, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
    Resource,
};
use std::{env::var, time::Duration};
use tonic::{
    metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{debug, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use ulid::Ulid;
use url::Url;

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

// Chatty dependencies; CDP frames in particular can carry cookie values.
const QUIET_TARGETS: [&str; 6] = [
    "hyper=error",
    "tokio=error",
    "chromiumoxide=warn",
    "tungstenite=warn",
    "cookie_store=warn",
    "opentelemetry_sdk=warn",
];

/// OTLP export settings, read from the standard `OTEL_*` variables.
#[derive(Debug)]
struct Exporter {
    endpoint: Url,
    metadata: MetadataMap,
    instance_id: String,
}

impl Exporter {
    /// `None` when `OTEL_EXPORTER_OTLP_ENDPOINT` is unset: logs only.
    fn from_env() -> Result<Option<Self>> {
        let Ok(endpoint) = var("OTEL_EXPORTER_OTLP_ENDPOINT") else {
            return Ok(None);
        };

        Ok(Some(Self {
            endpoint: parse_endpoint(&endpoint)?,
            metadata: var("OTEL_EXPORTER_OTLP_HEADERS")
                .map_or_else(|_| Ok(MetadataMap::new()), |raw| parse_metadata(&raw))?,
            instance_id: var("OTEL_SERVICE_INSTANCE_ID")
                .unwrap_or_else(|_| Ulid::new().to_string()),
        }))
    }

    fn resource(&self) -> Resource {
        Resource::builder_empty()
            .with_attributes(vec![
                KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                KeyValue::new("service.instance.id", self.instance_id.clone()),
                KeyValue::new("vcs.revision", crate::GIT_COMMIT_HASH),
                KeyValue::new("magang.browser.engine", "chromium"),
            ])
            .build()
    }

    fn install(self) -> Result<Tracer> {
        let mut builder = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(self.endpoint.as_str().trim_end_matches('/'))
            .with_compression(Compression::Gzip)
            .with_timeout(Duration::from_secs(3));

        if self.endpoint.scheme() == "https" {
            if let Some(host) = self.endpoint.host_str() {
                builder = builder.with_tls_config(
                    ClientTlsConfig::new()
                        .domain_name(host.to_string())
                        .with_native_roots(),
                );
            }
        }

        if !self.metadata.is_empty() {
            builder = builder.with_metadata(self.metadata.clone());
        }

        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(builder.build()?)
            .with_resource(self.resource())
            .build();

        let _ = TRACER_PROVIDER.set(provider.clone());

        global::set_tracer_provider(provider.clone());
        global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]));

        Ok(provider.tracer(env!("CARGO_PKG_NAME")))
    }
}

/// Collector endpoint; a bare `host:port` means gRPC over TLS.
fn parse_endpoint(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    let with_scheme = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    Url::parse(&with_scheme).with_context(|| format!("invalid OTLP endpoint: {raw}"))
}

/// `key=value,key=value` into gRPC metadata. Malformed pairs are an error.
fn parse_metadata(raw: &str) -> Result<MetadataMap> {
    let mut metadata = MetadataMap::new();

    for pair in raw.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("OTLP header without '=': {pair}"))?;
        let key = key.trim().to_ascii_lowercase();

        if key.ends_with("-bin") {
            return Err(anyhow!("binary OTLP header {key} is not supported"));
        }

        let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
            .map_err(|e| anyhow!("invalid OTLP header name {key}: {e}"))?;
        let value: MetadataValue<Ascii> = value
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid OTLP header value for {key}: {e}"))?;
        metadata.insert(name, value);
    }

    Ok(metadata)
}

fn env_filter(verbosity_level: Level) -> Result<EnvFilter> {
    let mut filter = EnvFilter::builder()
        .with_default_directive(verbosity_level.into())
        .from_env_lossy();
    for directive in QUIET_TARGETS {
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

/// Initialize logging and, when `OTEL_EXPORTER_OTLP_ENDPOINT` is set, span export.
///
/// # Errors
/// Returns an error if the OTLP settings are invalid or a subscriber is already set
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let filter = env_filter(verbosity_level.unwrap_or(Level::ERROR))?;

    let fmt_layer = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false)
        .pretty();

    let registry = Registry::default().with(fmt_layer).with(filter);

    match Exporter::from_env()? {
        Some(exporter) => {
            let tracer = exporter.install()?;
            tracing::subscriber::set_global_default(
                registry.with(tracing_opentelemetry::layer().with_tracer(tracer)),
            )?;
        }
        None => tracing::subscriber::set_global_default(registry)?,
    }

    Ok(())
}

/// Flush pending spans. Noop without an exporter.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("shutting down tracer provider");
        let _ = provider.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_defaults_to_https() -> Result<()> {
        assert_eq!(
            parse_endpoint("collector.internal:4317")?.as_str(),
            "https://collector.internal:4317/"
        );
        assert_eq!(parse_endpoint("http://localhost:4317")?.scheme(), "http");
        assert!(parse_endpoint("https://").is_err());
        Ok(())
    }

    #[test]
    fn metadata_is_lowercased_ascii() -> Result<()> {
        let metadata = parse_metadata("Authorization = Bearer abc , x-team=magang,")?;
        assert_eq!(metadata.len(), 2);
        assert_eq!(
            metadata.get("authorization").and_then(|v| v.to_str().ok()),
            Some("Bearer abc")
        );
        Ok(())
    }

    #[test]
    fn metadata_rejects_malformed_and_binary() {
        assert!(parse_metadata("no-equals-sign").is_err());
        assert!(parse_metadata("trace-bin=YmluYXJ5").is_err());
        assert!(parse_metadata("").is_ok_and(|m| m.is_empty()));
    }

    #[test]
    fn exporter_is_off_without_endpoint() {
        temp_env::with_var_unset("OTEL_EXPORTER_OTLP_ENDPOINT", || {
            assert!(Exporter::from_env().is_ok_and(|exporter| exporter.is_none()));
        });
    }

    #[test]
    fn resource_names_service_and_engine() {
        temp_env::with_vars(
            [
                ("OTEL_EXPORTER_OTLP_ENDPOINT", Some("localhost:4317")),
                ("OTEL_EXPORTER_OTLP_HEADERS", None),
                ("OTEL_SERVICE_INSTANCE_ID", Some("magang-1")),
            ],
            || {
                let exporter = Exporter::from_env().ok().flatten();
                let resource = exporter.map(|exporter| exporter.resource());
                let attrs: Vec<(String, String)> = resource
                    .iter()
                    .flat_map(|resource| resource.iter())
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect();

                assert!(attrs.contains(&("service.name".to_string(), "magang".to_string())));
                assert!(attrs.contains(&("service.instance.id".to_string(), "magang-1".to_string())));
                assert!(attrs.contains(&(
                    "magang.browser.engine".to_string(),
                    "chromium".to_string()
                )));
            },
        );
    }

    #[test]
    fn quiet_targets_parse() {
        assert!(env_filter(Level::DEBUG).is_ok());
    }

    #[test]
    fn shutdown_without_exporter_is_noop() {
        shutdown_tracer();
    }
}
