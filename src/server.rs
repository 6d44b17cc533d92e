//! Server-side tracing middleware.

use std::fmt;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use http::Request;
use opentelemetry::trace::{Span, SpanKind, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use tonic::metadata::MetadataMap;
use tower::{Layer, Service};

use crate::attributes::{keys, ServerAttribute};
use crate::body::{BodyRole, TracedBody, TracedCallFuture};
use crate::call::{CallRole, CallSpan, SharedCallSpan};
use crate::config::ServerTracingConfig;
use crate::context::CallContext;
use crate::operation::RpcMethod;
use crate::propagation::extract_parent;

pub(crate) const EXTRACT_FAILED_EVENT: &str = "trace context extraction failed";

/// Wraps a gRPC server stack with call tracing.
///
/// Every incoming call gets one server span, parented to the trace context
/// extracted from the call metadata when one is present. The span's
/// [`CallContext`] is published into the request extensions so handler code
/// can parent its own spans without any ambient lookup.
pub struct GrpcServerTracingLayer<T> {
    config: Arc<ServerTracingConfig<T>>,
}

impl<T> GrpcServerTracingLayer<T> {
    /// Create a layer from an immutable configuration.
    pub fn new(config: ServerTracingConfig<T>) -> Self {
        GrpcServerTracingLayer {
            config: Arc::new(config),
        }
    }
}

impl<T> Clone for GrpcServerTracingLayer<T> {
    fn clone(&self) -> Self {
        GrpcServerTracingLayer {
            config: Arc::clone(&self.config),
        }
    }
}

impl<S, T> Layer<S> for GrpcServerTracingLayer<T> {
    type Service = ServerTracingService<S, T>;

    fn layer(&self, inner: S) -> Self::Service {
        ServerTracingService {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

/// The service produced by [`GrpcServerTracingLayer`].
pub struct ServerTracingService<S, T> {
    inner: S,
    config: Arc<ServerTracingConfig<T>>,
}

impl<S: Clone, T> Clone for ServerTracingService<S, T> {
    fn clone(&self) -> Self {
        ServerTracingService {
            inner: self.inner.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S, T, ReqB, ResB> Service<Request<ReqB>> for ServerTracingService<S, T>
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
        let (mut parts, body) = request.into_parts();
        let metadata = MetadataMap::from_headers(std::mem::take(&mut parts.headers));

        let builder = config
            .tracer
            .span_builder((config.namer)(&method))
            .with_kind(SpanKind::Server);
        // Malformed propagation headers degrade to an error-tagged root span
        // instead of failing the call.
        let (span, parent) = match extract_parent(&config.propagator, &metadata) {
            Ok(parent) => (
                builder.start_with_context(&config.tracer, &parent),
                parent,
            ),
            Err(description) => {
                let parent = Context::new();
                let mut span = builder
                    .with_attributes([KeyValue::new(keys::ERROR, true)])
                    .start_with_context(&config.tracer, &parent);
                span.add_event(
                    EXTRACT_FAILED_EVENT,
                    vec![KeyValue::new("description", description)],
                );
                (span, parent)
            }
        };

        let call_cx = parent.with_remote_span_context(span.span_context().clone());
        parts.extensions.insert(CallContext::new(call_cx));

        let mut call = CallSpan::new(CallRole::Server, span, config.streaming, config.verbose);
        for attribute in &config.attributes {
            match attribute {
                ServerAttribute::MethodName => call.set_attribute(KeyValue::new(
                    keys::METHOD_NAME,
                    method.full_name().to_owned(),
                )),
                ServerAttribute::MethodType => call.set_attribute(KeyValue::new(
                    keys::METHOD_TYPE,
                    (config.kind_resolver)(&method).to_string(),
                )),
                ServerAttribute::CallAttributes => call.set_attribute(KeyValue::new(
                    keys::CALL_ATTRIBUTES,
                    format!("{:?} {}", parts.version, parts.uri),
                )),
                ServerAttribute::Headers => {
                    call.set_attribute(KeyValue::new(keys::HEADERS, format!("{metadata:?}")))
                }
            }
        }

        parts.headers = metadata.into_headers();
        let call = SharedCallSpan::new(call);
        let body = TracedBody::new(body, call.clone(), BodyRole::ServerRequest);
        let request = Request::from_parts(parts, body);
        TracedCallFuture::server(self.inner.call(request), call)
    }
}
