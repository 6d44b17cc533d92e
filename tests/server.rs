mod common;

use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use http::{Request, Response};
use http_body_util::BodyExt;
use opentelemetry::trace::{
    SpanId, SpanKind, Status, TraceId, Tracer as _, TracerProvider as _,
};
use opentelemetry::Value;
use opentelemetry_grpc::{
    CallContext, GrpcServerTracingLayer, RpcKind, ServerAttribute, ServerTracingConfig, TracedBody,
};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tower::{service_fn, Layer, Service, ServiceExt};

use common::{attr, event_names, grpc_body, grpc_request, string_attr, test_provider, TestBody};

type InnerRequest = Request<TracedBody<TestBody, opentelemetry_sdk::trace::Span>>;

fn server_config(
    provider: &SdkTracerProvider,
) -> ServerTracingConfig<opentelemetry_sdk::trace::SdkTracer> {
    ServerTracingConfig::new(provider.tracer("grpc-server"))
        .with_propagator(TraceContextPropagator::new())
}

fn traceparent(trace_id: u128, span_id: u64) -> String {
    format!("00-{trace_id:032x}-{span_id:016x}-01")
}

#[tokio::test]
async fn verbose_unary_call_records_two_events() {
    let (provider, exporter) = test_provider();
    let layer = GrpcServerTracingLayer::new(server_config(&provider).with_verbosity());
    let service = layer.layer(service_fn(|request: InnerRequest| async move {
        request.into_body().collect().await?;
        Ok::<_, Infallible>(Response::new(grpc_body(&[b"pong"], Some("0"))))
    }));

    let response = service.oneshot(grpc_request(&[b"ping"])).await.unwrap();
    response.into_body().collect().await.unwrap();

    let spans = exporter.get_finished_spans().unwrap();
    assert_eq!(spans.len(), 1);
    let span = &spans[0];
    assert_eq!(span.name, "test.Echo/Ping");
    assert_eq!(span.span_kind, SpanKind::Server);
    assert_eq!(event_names(span), ["message received", "call completed"]);
}

#[tokio::test]
async fn streaming_records_message_and_half_close_events_only() {
    let (provider, exporter) = test_provider();
    let layer = GrpcServerTracingLayer::new(server_config(&provider).with_streaming());
    let service = layer.layer(service_fn(|request: InnerRequest| async move {
        request.into_body().collect().await?;
        Ok::<_, Infallible>(Response::new(grpc_body(&[b"pong"], Some("0"))))
    }));

    let response = service.oneshot(grpc_request(&[b"ping"])).await.unwrap();
    response.into_body().collect().await.unwrap();

    let spans = exporter.get_finished_spans().unwrap();
    assert_eq!(
        event_names(&spans[0]),
        ["message received", "client finished sending messages"],
    );
}

#[tokio::test]
async fn default_configuration_is_silent() {
    let (provider, exporter) = test_provider();
    let layer = GrpcServerTracingLayer::new(server_config(&provider));
    let service = layer.layer(service_fn(|request: InnerRequest| async move {
        request.into_body().collect().await?;
        Ok::<_, Infallible>(Response::new(grpc_body(&[b"pong"], Some("0"))))
    }));

    let response = service.oneshot(grpc_request(&[b"ping"])).await.unwrap();
    response.into_body().collect().await.unwrap();

    let spans = exporter.get_finished_spans().unwrap();
    let span = &spans[0];
    assert!(span.attributes.is_empty());
    assert!(event_names(span).is_empty());
}

#[tokio::test]
async fn span_is_parented_from_incoming_metadata() {
    let (provider, exporter) = test_provider();
    let layer = GrpcServerTracingLayer::new(server_config(&provider));
    let service = layer.layer(service_fn(|request: InnerRequest| async move {
        request.into_body().collect().await?;
        Ok::<_, Infallible>(Response::new(grpc_body(&[], Some("0"))))
    }));

    let mut request = grpc_request(&[]);
    request
        .headers_mut()
        .insert("traceparent", traceparent(42, 7).parse().unwrap());
    let response = service.oneshot(request).await.unwrap();
    response.into_body().collect().await.unwrap();

    let spans = exporter.get_finished_spans().unwrap();
    let span = &spans[0];
    assert_eq!(span.span_context.trace_id(), TraceId::from_u128(42));
    assert_eq!(span.parent_span_id, SpanId::from_u64(7));
}

#[tokio::test]
async fn malformed_metadata_degrades_to_an_error_tagged_root_span() {
    let (provider, exporter) = test_provider();
    let layer = GrpcServerTracingLayer::new(server_config(&provider));
    let service = layer.layer(service_fn(|request: InnerRequest| async move {
        request.into_body().collect().await?;
        Ok::<_, Infallible>(Response::new(grpc_body(&[], Some("0"))))
    }));

    let mut request = grpc_request(&[]);
    request
        .headers_mut()
        .insert("traceparent", "garbage".parse().unwrap());
    let response = service.oneshot(request).await.unwrap();
    response.into_body().collect().await.unwrap();

    let spans = exporter.get_finished_spans().unwrap();
    assert_eq!(spans.len(), 1);
    let span = &spans[0];
    assert_eq!(span.parent_span_id, SpanId::INVALID);
    assert_eq!(attr(span, "error"), Some(Value::Bool(true)));
    assert!(event_names(span)
        .iter()
        .any(|name| name == "trace context extraction failed"));
}

#[tokio::test]
async fn call_context_is_published_to_the_handler() {
    let (provider, exporter) = test_provider();
    let layer = GrpcServerTracingLayer::new(server_config(&provider));
    let seen = Arc::new(Mutex::new(None::<TraceId>));
    let sink = Arc::clone(&seen);
    let service = layer.layer(service_fn(move |request: InnerRequest| {
        let sink = Arc::clone(&sink);
        async move {
            let call = request
                .extensions()
                .get::<CallContext>()
                .expect("call context published");
            *sink.lock().unwrap() = Some(call.trace_id());
            request.into_body().collect().await?;
            Ok::<_, Infallible>(Response::new(grpc_body(&[], Some("0"))))
        }
    }));

    let response = service.oneshot(grpc_request(&[])).await.unwrap();
    response.into_body().collect().await.unwrap();

    let spans = exporter.get_finished_spans().unwrap();
    let trace_id = seen.lock().unwrap().expect("handler saw the call context");
    assert_eq!(trace_id, spans[0].span_context.trace_id());
}

#[tokio::test]
async fn handler_spans_parent_from_the_call_context() {
    let (provider, exporter) = test_provider();
    let tracer = provider.tracer("handler");
    let layer = GrpcServerTracingLayer::new(server_config(&provider));
    let service = layer.layer(service_fn(move |request: InnerRequest| {
        let tracer = tracer.clone();
        async move {
            let call = request
                .extensions()
                .get::<CallContext>()
                .cloned()
                .expect("call context published");
            let child = tracer
                .span_builder("handle request")
                .start_with_context(&tracer, call.context());
            drop(child);
            request.into_body().collect().await?;
            Ok::<_, Infallible>(Response::new(grpc_body(&[], Some("0"))))
        }
    }));

    let response = service.oneshot(grpc_request(&[])).await.unwrap();
    response.into_body().collect().await.unwrap();

    let spans = exporter.get_finished_spans().unwrap();
    assert_eq!(spans.len(), 2);
    let child = spans.iter().find(|s| s.name == "handle request").unwrap();
    let server = spans.iter().find(|s| s.name == "test.Echo/Ping").unwrap();
    assert_eq!(child.span_context.trace_id(), server.span_context.trace_id());
    assert_eq!(child.parent_span_id, server.span_context.span_id());
}

#[tokio::test]
async fn configured_attributes_are_recorded() {
    let (provider, exporter) = test_provider();
    let config = server_config(&provider)
        .with_method_kinds(|_| RpcKind::Unary)
        .with_tracing_attributes([
            ServerAttribute::MethodName,
            ServerAttribute::MethodType,
            ServerAttribute::CallAttributes,
            ServerAttribute::Headers,
        ]);
    let layer = GrpcServerTracingLayer::new(config);
    let service = layer.layer(service_fn(|request: InnerRequest| async move {
        request.into_body().collect().await?;
        Ok::<_, Infallible>(Response::new(grpc_body(&[], Some("0"))))
    }));

    let response = service.oneshot(grpc_request(&[b"ping"])).await.unwrap();
    response.into_body().collect().await.unwrap();

    let spans = exporter.get_finished_spans().unwrap();
    let span = &spans[0];
    assert_eq!(
        string_attr(span, "grpc.method_name").as_deref(),
        Some("test.Echo/Ping")
    );
    assert_eq!(string_attr(span, "grpc.method_type").as_deref(), Some("unary"));
    let call_attributes = string_attr(span, "grpc.call_attributes").unwrap();
    assert!(call_attributes.contains("test.Echo/Ping"), "{call_attributes}");
    let headers = string_attr(span, "grpc.headers").unwrap();
    assert!(headers.contains("content-type"), "{headers}");
}

#[tokio::test]
async fn failing_status_marks_the_span() {
    let (provider, exporter) = test_provider();
    let layer = GrpcServerTracingLayer::new(server_config(&provider).with_verbosity());
    let service = layer.layer(service_fn(|request: InnerRequest| async move {
        request.into_body().collect().await?;
        Ok::<_, Infallible>(Response::new(grpc_body(&[], Some("13"))))
    }));

    let response = service.oneshot(grpc_request(&[])).await.unwrap();
    response.into_body().collect().await.unwrap();

    let spans = exporter.get_finished_spans().unwrap();
    let span = &spans[0];
    assert_eq!(attr(span, "error"), Some(Value::Bool(true)));
    assert!(matches!(span.status, Status::Error { .. }));
}

#[tokio::test]
async fn dropped_call_counts_as_cancellation() {
    let (provider, exporter) = test_provider();
    let layer = GrpcServerTracingLayer::new(server_config(&provider));
    let mut service = layer.layer(service_fn(|request: InnerRequest| async move {
        request.into_body().collect().await?;
        Ok::<_, Infallible>(Response::new(grpc_body(&[], Some("0"))))
    }));

    let service = service.ready().await.unwrap();
    let future = service.call(grpc_request(&[b"ping"]));
    // The client went away before the call completed.
    drop(future);

    let spans = exporter.get_finished_spans().unwrap();
    assert_eq!(spans.len(), 1);
    assert_eq!(event_names(&spans[0]), ["call cancelled"]);
}
