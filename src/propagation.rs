//! Trace-context propagation through gRPC call metadata.
//!
//! gRPC metadata doubles as the propagation carrier: string key/value pairs
//! map directly onto the [`Injector`]/[`Extractor`] carrier interface.
//! Binary-valued keys (`-bin` suffix) are not representable in the text
//! propagation format and are skipped on extraction.

use std::sync::Arc;

use opentelemetry::otel_warn;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::{global, Context};
use tonic::metadata::{KeyRef, MetadataKey, MetadataMap, MetadataValue};

/// Writes propagation fields into outgoing gRPC metadata.
pub struct MetadataInjector<'a>(pub &'a mut MetadataMap);

impl Injector for MetadataInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        match MetadataKey::from_bytes(key.as_bytes()) {
            Ok(key) => match MetadataValue::try_from(&value) {
                Ok(value) => {
                    self.0.insert(key, value);
                }
                Err(_) => {
                    otel_warn!(
                        name: "GrpcTracing.InvalidPropagationValue",
                        message = "propagation field value is not valid gRPC metadata, skipping",
                        key = key.to_string()
                    );
                }
            },
            Err(_) => {
                otel_warn!(
                    name: "GrpcTracing.InvalidPropagationKey",
                    message = "propagation field key is not a valid gRPC metadata key, skipping",
                    key = key.to_string()
                );
            }
        }
    }
}

/// Reads propagation fields from incoming gRPC metadata.
pub struct MetadataExtractor<'a>(pub &'a MetadataMap);

impl Extractor for MetadataExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0
            .keys()
            .filter_map(|key| match key {
                KeyRef::Ascii(key) => Some(key.as_str()),
                KeyRef::Binary(_) => None,
            })
            .collect()
    }
}

/// Runs `f` against the configured propagator, falling back to the global
/// one when no override is set.
pub(crate) fn with_propagator<R>(
    propagator: &Option<Arc<dyn TextMapPropagator + Send + Sync>>,
    mut f: impl FnMut(&dyn TextMapPropagator) -> R,
) -> R {
    match propagator {
        Some(propagator) => f(propagator.as_ref()),
        None => global::get_text_map_propagator(|propagator| f(propagator)),
    }
}

/// Extracts the parent context for a server span from incoming metadata.
///
/// Returns `Ok` with the extracted context (an empty context when no
/// propagation fields are present, yielding a root span). Returns `Err` with
/// a description when propagation fields are present but do not form a valid
/// span context; the caller starts a root span tagged with the error rather
/// than failing the call.
pub(crate) fn extract_parent(
    propagator: &Option<Arc<dyn TextMapPropagator + Send + Sync>>,
    metadata: &MetadataMap,
) -> Result<Context, String> {
    let extractor = MetadataExtractor(metadata);
    with_propagator(propagator, |propagator| {
        let fields: Vec<&str> = propagator
            .fields()
            .filter(|field| extractor.get(field).is_some())
            .collect();
        let cx = propagator.extract_with_context(&Context::new(), &extractor);
        if cx.span().span_context().is_valid() {
            Ok(cx)
        } else if fields.is_empty() {
            Ok(Context::new())
        } else {
            Err(format!(
                "propagation fields [{}] did not yield a valid span context",
                fields.join(", ")
            ))
        }
    })
}
