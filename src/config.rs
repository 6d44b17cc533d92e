//! Immutable per-interceptor configuration.
//!
//! Configs are assembled with consuming `with_*` methods and shared behind
//! an `Arc` by the layer, so one configuration safely serves any number of
//! concurrent calls.

use std::fmt;
use std::sync::Arc;

use opentelemetry::propagation::TextMapPropagator;

use crate::attributes::{ClientAttribute, ServerAttribute};
use crate::context::ActiveSpanSource;
use crate::operation::{
    default_method_kind_resolver, default_operation_namer, MethodKindResolver, OperationNamer,
    RpcKind, RpcMethod,
};

/// Configuration of the client-side tracing middleware.
#[derive(Clone)]
pub struct ClientTracingConfig<T> {
    pub(crate) tracer: T,
    pub(crate) namer: OperationNamer,
    pub(crate) kind_resolver: MethodKindResolver,
    pub(crate) active_span_source: ActiveSpanSource,
    pub(crate) streaming: bool,
    pub(crate) verbose: bool,
    pub(crate) attributes: Vec<ClientAttribute>,
    pub(crate) propagator: Option<Arc<dyn TextMapPropagator + Send + Sync>>,
}

impl<T> ClientTracingConfig<T> {
    /// Configuration with defaults: full method name as the operation name,
    /// no attributes, no per-message or verbose events, the ambient context
    /// as parent source, and the globally registered propagator.
    pub fn new(tracer: T) -> Self {
        ClientTracingConfig {
            tracer,
            namer: default_operation_namer(),
            kind_resolver: default_method_kind_resolver(),
            active_span_source: ActiveSpanSource::default(),
            streaming: false,
            verbose: false,
            attributes: Vec::new(),
            propagator: None,
        }
    }

    /// Replace the operation-name strategy.
    pub fn with_operation_namer(
        mut self,
        namer: impl Fn(&RpcMethod) -> String + Send + Sync + 'static,
    ) -> Self {
        self.namer = Arc::new(namer);
        self
    }

    /// Supply the method-kind resolver used for the `MethodType` attribute.
    pub fn with_method_kinds(
        mut self,
        resolver: impl Fn(&RpcMethod) -> RpcKind + Send + Sync + 'static,
    ) -> Self {
        self.kind_resolver = Arc::new(resolver);
        self
    }

    /// Replace the parent-span source.
    pub fn with_active_span_source(mut self, source: ActiveSpanSource) -> Self {
        self.active_span_source = source;
        self
    }

    /// Record an event per message and on half-close.
    pub fn with_streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// Record every call-lifecycle event.
    pub fn with_verbosity(mut self) -> Self {
        self.verbose = true;
        self
    }

    /// Select the call attributes to record as span tags.
    pub fn with_tracing_attributes(
        mut self,
        attributes: impl IntoIterator<Item = ClientAttribute>,
    ) -> Self {
        self.attributes = attributes.into_iter().collect();
        self
    }

    /// Use a specific propagator instead of the globally registered one.
    pub fn with_propagator(
        mut self,
        propagator: impl TextMapPropagator + Send + Sync + 'static,
    ) -> Self {
        self.propagator = Some(Arc::new(propagator));
        self
    }
}

impl<T> fmt::Debug for ClientTracingConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientTracingConfig")
            .field("active_span_source", &self.active_span_source)
            .field("streaming", &self.streaming)
            .field("verbose", &self.verbose)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

/// Configuration of the server-side tracing middleware.
#[derive(Clone)]
pub struct ServerTracingConfig<T> {
    pub(crate) tracer: T,
    pub(crate) namer: OperationNamer,
    pub(crate) kind_resolver: MethodKindResolver,
    pub(crate) streaming: bool,
    pub(crate) verbose: bool,
    pub(crate) attributes: Vec<ServerAttribute>,
    pub(crate) propagator: Option<Arc<dyn TextMapPropagator + Send + Sync>>,
}

impl<T> ServerTracingConfig<T> {
    /// Configuration with defaults mirroring [`ClientTracingConfig::new`].
    pub fn new(tracer: T) -> Self {
        ServerTracingConfig {
            tracer,
            namer: default_operation_namer(),
            kind_resolver: default_method_kind_resolver(),
            streaming: false,
            verbose: false,
            attributes: Vec::new(),
            propagator: None,
        }
    }

    /// Replace the operation-name strategy.
    pub fn with_operation_namer(
        mut self,
        namer: impl Fn(&RpcMethod) -> String + Send + Sync + 'static,
    ) -> Self {
        self.namer = Arc::new(namer);
        self
    }

    /// Supply the method-kind resolver used for the `MethodType` attribute.
    pub fn with_method_kinds(
        mut self,
        resolver: impl Fn(&RpcMethod) -> RpcKind + Send + Sync + 'static,
    ) -> Self {
        self.kind_resolver = Arc::new(resolver);
        self
    }

    /// Record an event per message and on half-close.
    pub fn with_streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// Record every call-lifecycle event.
    pub fn with_verbosity(mut self) -> Self {
        self.verbose = true;
        self
    }

    /// Select the call attributes to record as span tags.
    pub fn with_tracing_attributes(
        mut self,
        attributes: impl IntoIterator<Item = ServerAttribute>,
    ) -> Self {
        self.attributes = attributes.into_iter().collect();
        self
    }

    /// Use a specific propagator instead of the globally registered one.
    pub fn with_propagator(
        mut self,
        propagator: impl TextMapPropagator + Send + Sync + 'static,
    ) -> Self {
        self.propagator = Some(Arc::new(propagator));
        self
    }
}

impl<T> fmt::Debug for ServerTracingConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerTracingConfig")
            .field("streaming", &self.streaming)
            .field("verbose", &self.verbose)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}
