//! Log output plus optional OTLP trace export.
//!
//! Export is on only when `OTEL_EXPORTER_OTLP_ENDPOINT` is set. Spans then go
//! over gRPC (tonic) to that endpoint, with `OTEL_EXPORTER_OTLP_HEADERS`
//! (`k=v,k2=v2`) sent as request metadata.

use anyhow::{anyhow, Context, Result};
use base64ct::{Base64, Encoding};
use once_cell::sync::OnceCell;
use opentelemetry::{global, propagation::TextMapCompositePropagator, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    propagation::{BaggagePropagator, TraceContextPropagator},
    runtime,
    trace::{Tracer, TracerProvider},
    Resource,
};
use std::time::Duration;
use tonic::{
    metadata::{Ascii, Binary, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{debug, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use ulid::Ulid;
use url::Url;

const ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
const HEADERS_ENV: &str = "OTEL_EXPORTER_OTLP_HEADERS";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

static TRACER_PROVIDER: OnceCell<TracerProvider> = OnceCell::new();

/// Where and how spans are exported.
#[derive(Debug)]
struct Exporter {
    endpoint: Url,
    metadata: MetadataMap,
}

impl Exporter {
    /// `None` when no endpoint is configured.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        let Some(raw) = lookup(ENDPOINT_ENV).filter(|v| !v.trim().is_empty()) else {
            return Ok(None);
        };
        // bare host:port means TLS
        let raw = raw.trim().trim_end_matches('/');
        let endpoint = if raw.contains("://") {
            Url::parse(raw)
        } else {
            Url::parse(&format!("https://{raw}"))
        }
        .with_context(|| format!("invalid {ENDPOINT_ENV}: {raw}"))?;

        let metadata = match lookup(HEADERS_ENV) {
            Some(headers) => metadata(&headers)?,
            None => MetadataMap::new(),
        };
        Ok(Some(Self { endpoint, metadata }))
    }

    fn tls_domain(&self) -> Option<&str> {
        (self.endpoint.scheme() == "https")
            .then(|| self.endpoint.host_str())
            .flatten()
    }

    fn tracer(self) -> Result<Tracer> {
        let mut builder = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(self.endpoint.as_str().trim_end_matches('/'))
            .with_timeout(EXPORT_TIMEOUT);

        if let Some(domain) = self.tls_domain() {
            builder = builder.with_tls_config(
                ClientTlsConfig::new()
                    .domain_name(domain.to_string())
                    .with_native_roots(),
            );
        }
        if !self.metadata.is_empty() {
            builder = builder.with_metadata(self.metadata);
        }

        let provider = TracerProvider::builder()
            .with_batch_exporter(builder.build()?, runtime::Tokio)
            .with_resource(Resource::new(vec![
                KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                KeyValue::new("service.instance.id", Ulid::new().to_string()),
            ]))
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

/// Parse `k=v,k2=v2` into gRPC metadata. Pairs without `=` are skipped; keys
/// ending in `-bin` carry base64 values.
fn metadata(headers: &str) -> Result<MetadataMap> {
    let mut map = MetadataMap::new();
    for (key, value) in headers.split(',').filter_map(|pair| pair.split_once('=')) {
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if key.ends_with("-bin") {
            let bytes = Base64::decode_vec(value)
                .map_err(|e| anyhow!("header {key}: value is not base64: {e}"))?;
            let name = MetadataKey::<Binary>::from_bytes(key.as_bytes())
                .map_err(|e| anyhow!("header {key}: {e}"))?;
            map.insert_bin(name, MetadataValue::from_bytes(&bytes));
        } else {
            let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
                .map_err(|e| anyhow!("header {key}: {e}"))?;
            let value = value
                .parse::<MetadataValue<Ascii>>()
                .map_err(|e| anyhow!("header {key}: {e}"))?;
            map.insert(name, value);
        }
    }
    Ok(map)
}

fn filter(level: Level) -> Result<EnvFilter> {
    Ok(EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?))
}

/// Install the global subscriber. Defaults to `ERROR` when no level is given.
///
/// # Errors
/// Returns an error if the exporter settings are invalid or a subscriber is
/// already installed.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false);
    let filter = filter(verbosity_level.unwrap_or(Level::ERROR))?;

    match Exporter::from_lookup(|key| std::env::var(key).ok())? {
        Some(exporter) => {
            let otel_layer = tracing_opentelemetry::layer().with_tracer(exporter.tracer()?);
            let subscriber = Registry::default()
                .with(fmt_layer)
                .with(otel_layer)
                .with(filter);
            tracing::subscriber::set_global_default(subscriber)?;
        }
        None => {
            tracing::subscriber::set_global_default(Registry::default().with(fmt_layer).with(filter))?;
        }
    }
    Ok(())
}

/// Flush pending spans. No-op when export is off.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("shutting down tracer provider");
        let _ = provider.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn export_is_off_without_endpoint() -> Result<()> {
        assert!(Exporter::from_lookup(lookup(&[]))?.is_none());
        assert!(Exporter::from_lookup(lookup(&[(ENDPOINT_ENV, " ")]))?.is_none());
        // headers alone do not turn export on
        assert!(Exporter::from_lookup(lookup(&[(HEADERS_ENV, "a=b")]))?.is_none());
        Ok(())
    }

    #[test]
    fn bare_endpoint_uses_tls() -> Result<()> {
        let exporter = Exporter::from_lookup(lookup(&[(ENDPOINT_ENV, "otel.example.com:4317/")]))?
            .ok_or_else(|| anyhow!("expected an exporter"))?;
        assert_eq!(exporter.endpoint.scheme(), "https");
        assert_eq!(exporter.endpoint.port(), Some(4317));
        assert_eq!(exporter.tls_domain(), Some("otel.example.com"));

        let plain = Exporter::from_lookup(lookup(&[(ENDPOINT_ENV, "http://localhost:4317")]))?
            .ok_or_else(|| anyhow!("expected an exporter"))?;
        assert_eq!(plain.tls_domain(), None);
        Ok(())
    }

    #[test]
    fn headers_become_metadata() -> Result<()> {
        let exporter = Exporter::from_lookup(lookup(&[
            (ENDPOINT_ENV, "http://localhost:4317"),
            // "binary data"
            (HEADERS_ENV, "Authorization = Bearer token123 ,malformed,trace-bin=YmluYXJ5IGRhdGE="),
        ]))?
        .ok_or_else(|| anyhow!("expected an exporter"))?;

        assert_eq!(exporter.metadata.len(), 2);
        assert_eq!(
            exporter
                .metadata
                .get("authorization")
                .and_then(|v| v.to_str().ok()),
            Some("Bearer token123")
        );
        assert!(exporter.metadata.get_bin("trace-bin").is_some());
        Ok(())
    }

    #[test]
    fn invalid_binary_header_is_an_error() {
        let err = metadata("custom-bin=not-valid-base64!!!")
            .err()
            .map(|e| e.to_string());
        assert!(err.is_some_and(|e| e.contains("not base64")));
    }

    #[test]
    fn filter_accepts_every_level() {
        for level in [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE] {
            assert!(filter(level).is_ok());
        }
    }

    #[test]
    fn shutdown_without_exporter_is_a_no_op() {
        shutdown_tracer();
    }
}
