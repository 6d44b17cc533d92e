//! OpenTelemetry instrumentation for gRPC clients and servers built on
//! [`tonic`].
//!
//! Each gRPC call is wrapped by a [`tower`] middleware that creates one span
//! per call, records configurable call attributes and lifecycle events, and
//! propagates trace context through the call metadata using any
//! [`TextMapPropagator`](opentelemetry::propagation::TextMapPropagator).
//!
//! The middleware is purely observational: it never alters the request, the
//! response, or the outcome of a call, and every tracing operation is
//! best-effort.
//!
//! # Components
//!
//! - [`GrpcClientTracingLayer`] wraps the service feeding a tonic client. The
//!   client span is parented from the configured [`ActiveSpanSource`] (or an
//!   explicit [`CallContext`] in the request extensions) and its context is
//!   injected into the outgoing metadata.
//! - [`GrpcServerTracingLayer`] wraps a gRPC server stack. The server span is
//!   parented from the extracted metadata context and published as a
//!   [`CallContext`] in the request extensions for handler code.
//!
//! # Getting started
//!
//! ```no_run
//! use opentelemetry::trace::TracerProvider as _;
//! use opentelemetry_grpc::{ClientAttribute, ClientTracingConfig, GrpcClientTracingLayer};
//! use opentelemetry_sdk::trace::SdkTracerProvider;
//!
//! let provider = SdkTracerProvider::builder().build();
//! let config = ClientTracingConfig::new(provider.tracer("grpc-client"))
//!     .with_verbosity()
//!     .with_tracing_attributes([ClientAttribute::MethodName, ClientAttribute::Deadline]);
//! let layer = GrpcClientTracingLayer::new(config);
//! // Compose with tower::ServiceBuilder around a tonic channel or server.
//! ```
//!
//! # Lifecycle events
//!
//! With `with_verbosity()` every lifecycle event of a call is recorded on
//! the span; with `with_streaming()` only the per-message and half-close
//! events are. The span is finished exactly once, on the first terminal
//! event: completion (trailers or a trailers-only response), failure, or
//! cancellation (the call dropped before completing).

#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod attributes;
mod body;
mod call;
mod client;
mod config;
mod context;
mod operation;
mod propagation;
mod server;

pub use attributes::{ClientAttribute, ServerAttribute};
pub use body::{TracedBody, TracedCallFuture};
pub use client::{ClientTracingService, GrpcClientTracingLayer};
pub use config::{ClientTracingConfig, ServerTracingConfig};
pub use context::{ActiveSpanSource, CallContext};
pub use operation::{MethodKindResolver, OperationNamer, RpcKind, RpcMethod};
pub use propagation::{MetadataExtractor, MetadataInjector};
pub use server::{GrpcServerTracingLayer, ServerTracingService};
