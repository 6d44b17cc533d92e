//! Strategies mapping a gRPC method identifier to span metadata.

use std::fmt;
use std::sync::Arc;

/// A gRPC method identifier, parsed from the `:path` pseudo-header of a call
/// (`/package.Service/Method`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcMethod {
    full_name: String,
}

impl RpcMethod {
    /// Parse a method identifier from a request URI path.
    pub fn from_path(path: &str) -> Self {
        RpcMethod {
            full_name: path.trim_start_matches('/').to_owned(),
        }
    }

    /// The fully qualified method name, `package.Service/Method`.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// The fully qualified service name, `package.Service`.
    pub fn service(&self) -> &str {
        self.full_name
            .split_once('/')
            .map(|(service, _)| service)
            .unwrap_or(&self.full_name)
    }

    /// The bare method name.
    pub fn name(&self) -> &str {
        self.full_name
            .split_once('/')
            .map(|(_, name)| name)
            .unwrap_or("")
    }
}

/// Strategy mapping a method identifier to the span operation name.
///
/// The default uses the fully qualified method name as provided by the RPC
/// layer. Supply a custom namer for prefixing or renaming.
pub type OperationNamer = Arc<dyn Fn(&RpcMethod) -> String + Send + Sync>;

pub(crate) fn default_operation_namer() -> OperationNamer {
    Arc::new(|method: &RpcMethod| method.full_name().to_owned())
}

/// The gRPC method type.
///
/// The method type is part of the generated service descriptor and is not
/// recoverable from the wire representation of a call, so recording it as a
/// span tag requires a [`MethodKindResolver`] supplied by the application.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RpcKind {
    /// Single request, single response.
    Unary,
    /// Streaming requests, single response.
    ClientStreaming,
    /// Single request, streaming responses.
    ServerStreaming,
    /// Streaming both ways.
    BidiStreaming,
    /// No resolver configured for this method.
    Unknown,
}

impl fmt::Display for RpcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RpcKind::Unary => "unary",
            RpcKind::ClientStreaming => "client_streaming",
            RpcKind::ServerStreaming => "server_streaming",
            RpcKind::BidiStreaming => "bidi_streaming",
            RpcKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Strategy resolving the [`RpcKind`] of a method identifier.
pub type MethodKindResolver = Arc<dyn Fn(&RpcMethod) -> RpcKind + Send + Sync>;

pub(crate) fn default_method_kind_resolver() -> MethodKindResolver {
    Arc::new(|_: &RpcMethod| RpcKind::Unknown)
}
