//! Request-scoped trace context and the client-side parent-span strategy.

use std::fmt;
use std::sync::Arc;

use opentelemetry::trace::{SpanContext, TraceContextExt, TraceId};
use opentelemetry::Context;

/// The trace context of the span covering one call, published into the
/// request's [`http::Extensions`] by the server middleware.
///
/// Handler code retrieves it from the request to start child spans or to
/// read trace identifiers, instead of relying on thread-local lookup:
///
/// ```ignore
/// let call = request.extensions().get::<CallContext>();
/// ```
///
/// On the client side, inserting a `CallContext` into an outgoing request's
/// extensions overrides the configured [`ActiveSpanSource`] as the parent of
/// the client span.
#[derive(Clone, Debug)]
pub struct CallContext {
    cx: Context,
}

impl CallContext {
    /// Wrap a context whose active span covers the call.
    pub fn new(cx: Context) -> Self {
        CallContext { cx }
    }

    /// The context carrying the call's span, suitable as a parent for
    /// handler-side child spans.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    /// The span context of the call's span.
    pub fn span_context(&self) -> SpanContext {
        self.cx.span().span_context().clone()
    }

    /// The trace id of the call's span.
    pub fn trace_id(&self) -> TraceId {
        self.span_context().trace_id()
    }
}

impl From<Context> for CallContext {
    fn from(cx: Context) -> Self {
        CallContext::new(cx)
    }
}

/// Client-side strategy for resolving the parent of a new client span.
///
/// An explicit [`CallContext`] in the outgoing request's extensions always
/// wins over the configured source.
#[derive(Clone, Default)]
pub enum ActiveSpanSource {
    /// Never reports a parent; every client span starts a new trace.
    None,
    /// The ambient [`Context::current()`], which is the context published by
    /// an enclosing server middleware or attached manually.
    #[default]
    Current,
    /// A custom supplier, for applications with their own context plumbing.
    Custom(Arc<dyn Fn() -> Context + Send + Sync>),
}

impl ActiveSpanSource {
    pub(crate) fn resolve(&self, extensions: &http::Extensions) -> Context {
        if let Some(call) = extensions.get::<CallContext>() {
            return call.context().clone();
        }
        match self {
            ActiveSpanSource::None => Context::new(),
            ActiveSpanSource::Current => Context::current(),
            ActiveSpanSource::Custom(supplier) => supplier(),
        }
    }
}

impl fmt::Debug for ActiveSpanSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveSpanSource::None => f.write_str("None"),
            ActiveSpanSource::Current => f.write_str("Current"),
            ActiveSpanSource::Custom(_) => f.write_str("Custom"),
        }
    }
}
