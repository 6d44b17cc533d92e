//! Client-side tracing middleware.

use std::fmt;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use http::Request;
use opentelemetry::trace::{Span, SpanKind, TraceContextExt, Tracer};
use opentelemetry::KeyValue;
use tonic::metadata::MetadataMap;
use tower::{Layer, Service};

use crate::attributes::{grpc_timeout_millis, keys, ClientAttribute, NULL_VALUE};
use crate::body::{BodyRole, TracedBody, TracedCallFuture};
use crate::call::{CallRole, CallSpan, SharedCallSpan};
use crate::config::ClientTracingConfig;
use crate::operation::RpcMethod;
use crate::propagation::{with_propagator, MetadataInjector};

/// Wraps a gRPC client stack with call tracing.
///
/// Layer onto the service feeding a tonic client. Every call through the
/// wrapped service gets one client span: created before the request is
/// forwarded, propagated through the outgoing metadata, and finished on the
/// call's terminal event.
pub struct GrpcClientTracingLayer<T> {
    config: Arc<ClientTracingConfig<T>>,
}

impl<T> GrpcClientTracingLayer<T> {
    /// Create a layer from an immutable configuration.
    pub fn new(config: ClientTracingConfig<T>) -> Self {
        GrpcClientTracingLayer {
            config: Arc::new(config),
        }
    }
}

impl<T> Clone for GrpcClientTracingLayer<T> {
    fn clone(&self) -> Self {
        GrpcClientTracingLayer {
            config: Arc::clone(&self.config),
        }
    }
}

impl<S, T> Layer<S> for GrpcClientTracingLayer<T> {
    type Service = ClientTracingService<S, T>;

    fn layer(&self, inner: S) -> Self::Service {
        ClientTracingService {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

/// The service produced by [`GrpcClientTracingLayer`].
pub struct ClientTracingService<S, T> {
    inner: S,
    config: Arc<ClientTracingConfig<T>>,
}

impl<S: Clone, T> Clone for ClientTracingService<S, T> {
    fn clone(&self) -> Self {
        ClientTracingService {
            inner: self.inner.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S, T, ReqB, ResB> Service<Request<ReqB>> for ClientTracingService<S, T>
where
    T: Tracer,
    S: Service<Request<TracedBody<ReqB, T::Span>>, Response = http::Response<ResB>>,
    S::Error: fmt::Display,
    ResB: http_body::Body,
{
    type Response = http::Response<TracedBody<ResB, T::Span>>;
    type Error = S::Error;
    type Future = TracedCallFuture<S::Future, T::Span>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqB>) -> Self::Future {
        let config = self.config.as_ref();
        let method = RpcMethod::from_path(request.uri().path());
        let parent = config.active_span_source.resolve(request.extensions());
        let span = config
            .tracer
            .span_builder((config.namer)(&method))
            .with_kind(SpanKind::Client)
            .start_with_context(&config.tracer, &parent);
        let span_context = span.span_context().clone();

        let (mut parts, body) = request.into_parts();
        let mut metadata = MetadataMap::from_headers(std::mem::take(&mut parts.headers));

        let mut call = CallSpan::new(CallRole::Client, span, config.streaming, config.verbose);
        for attribute in &config.attributes {
            match attribute {
                ClientAttribute::MethodName => call.set_attribute(KeyValue::new(
                    keys::METHOD_NAME,
                    method.full_name().to_owned(),
                )),
                ClientAttribute::MethodType => call.set_attribute(KeyValue::new(
                    keys::METHOD_TYPE,
                    (config.kind_resolver)(&method).to_string(),
                )),
                ClientAttribute::Deadline => {
                    let remaining = metadata
                        .get("grpc-timeout")
                        .and_then(|value| value.to_str().ok())
                        .and_then(grpc_timeout_millis);
                    match remaining {
                        Some(millis) => call
                            .set_attribute(KeyValue::new(keys::DEADLINE_MILLIS, millis as i64)),
                        None => call.set_attribute(KeyValue::new(keys::DEADLINE_MILLIS, NULL_VALUE)),
                    }
                }
                ClientAttribute::Compressor => {
                    let compressor = metadata
                        .get("grpc-encoding")
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_owned)
                        .unwrap_or_else(|| NULL_VALUE.to_owned());
                    call.set_attribute(KeyValue::new(keys::COMPRESSOR, compressor));
                }
                ClientAttribute::Authority => {
                    let authority = parts
                        .uri
                        .authority()
                        .map(|authority| authority.to_string())
                        .unwrap_or_else(|| NULL_VALUE.to_owned());
                    call.set_attribute(KeyValue::new(keys::AUTHORITY, authority));
                }
                ClientAttribute::CallOptions => call.set_attribute(KeyValue::new(
                    keys::CALL_OPTIONS,
                    call_options_summary(&parts, &metadata),
                )),
                // Tagged below, once propagation fields are injected.
                ClientAttribute::Headers => {}
            }
        }

        let inject_cx = parent.with_remote_span_context(span_context);
        with_propagator(&config.propagator, |propagator| {
            propagator.inject_context(&inject_cx, &mut MetadataInjector(&mut metadata))
        });
        if config.attributes.contains(&ClientAttribute::Headers) {
            call.set_attribute(KeyValue::new(keys::HEADERS, format!("{metadata:?}")));
        }
        call.started();

        parts.headers = metadata.into_headers();
        let call = SharedCallSpan::new(call);
        let body = TracedBody::new(body, call.clone(), BodyRole::ClientRequest);
        let request = Request::from_parts(parts, body);
        TracedCallFuture::client(self.inner.call(request), call)
    }
}

fn call_options_summary(parts: &http::request::Parts, metadata: &MetadataMap) -> String {
    let deadline = metadata
        .get("grpc-timeout")
        .and_then(|value| value.to_str().ok())
        .unwrap_or(NULL_VALUE);
    let compressor = metadata
        .get("grpc-encoding")
        .and_then(|value| value.to_str().ok())
        .unwrap_or(NULL_VALUE);
    let authority = parts
        .uri
        .authority()
        .map(|authority| authority.as_str())
        .unwrap_or(NULL_VALUE);
    format!("CallOptions{{deadline={deadline}, compressor={compressor}, authority={authority}}}")
}
