#![allow(dead_code)]

use std::convert::Infallible;

use bytes::Bytes;
use futures_util::stream;
use http::{HeaderMap, HeaderValue, Method, Request};
use http_body::Frame;
use http_body_util::StreamBody;
use opentelemetry::Value;
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};

pub type TestBody =
    StreamBody<stream::Iter<std::vec::IntoIter<Result<Frame<Bytes>, Infallible>>>>;

pub fn test_provider() -> (SdkTracerProvider, InMemorySpanExporter) {
    let exporter = InMemorySpanExporter::default();
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    (provider, exporter)
}

/// A gRPC-shaped body: one DATA frame per message, and a trailers frame
/// carrying `grpc-status` when a status is given.
pub fn grpc_body(messages: &[&[u8]], status: Option<&str>) -> TestBody {
    let mut frames: Vec<Result<Frame<Bytes>, Infallible>> = messages
        .iter()
        .map(|message| Ok(Frame::data(Bytes::copy_from_slice(message))))
        .collect();
    if let Some(code) = status {
        let mut trailers = HeaderMap::new();
        trailers.insert("grpc-status", HeaderValue::from_str(code).unwrap());
        frames.push(Ok(Frame::trailers(trailers)));
    }
    StreamBody::new(stream::iter(frames))
}

pub fn grpc_request(messages: &[&[u8]]) -> Request<TestBody> {
    Request::builder()
        .method(Method::POST)
        .uri("http://localhost:50051/test.Echo/Ping")
        .header("content-type", "application/grpc")
        .body(grpc_body(messages, None))
        .unwrap()
}

pub fn event_names(span: &SpanData) -> Vec<String> {
    span.events
        .iter()
        .map(|event| event.name.to_string())
        .collect()
}

pub fn attr(span: &SpanData, key: &str) -> Option<Value> {
    span.attributes
        .iter()
        .filter(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.clone())
        .next()
}

pub fn attr_count(span: &SpanData, key: &str) -> usize {
    span.attributes
        .iter()
        .filter(|kv| kv.key.as_str() == key)
        .count()
}

pub fn string_attr(span: &SpanData, key: &str) -> Option<String> {
    match attr(span, key) {
        Some(Value::String(value)) => Some(value.to_string()),
        _ => None,
    }
}
