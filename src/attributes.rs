//! Call attributes that may be recorded as span tags.
//!
//! Tagging is opt-in per attribute kind; an empty attribute set produces a
//! span with no `grpc.*` tags. Keys live here as `const` values to keep them
//! consistent between the client and server middleware.

/// Client-side call attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientAttribute {
    /// Fully qualified method name, as `grpc.method_name`.
    MethodName,
    /// Resolved [`RpcKind`](crate::RpcKind) string form, as `grpc.method_type`.
    MethodType,
    /// Remaining call deadline in milliseconds from the `grpc-timeout`
    /// metadata, or the string `"null"` when unset, as `grpc.deadline_millis`.
    Deadline,
    /// The `grpc-encoding` compressor name, or `"null"`, as `grpc.compressor`.
    Compressor,
    /// The request authority, or `"null"`, as `grpc.authority`.
    Authority,
    /// A serialized summary of per-call options, as `grpc.call_options`.
    CallOptions,
    /// Serialized outgoing metadata (after propagation fields are injected),
    /// as `grpc.headers`.
    Headers,
}

/// Server-side call attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerAttribute {
    /// Fully qualified method name, as `grpc.method_name`.
    MethodName,
    /// Resolved [`RpcKind`](crate::RpcKind) string form, as `grpc.method_type`.
    MethodType,
    /// Serialized HTTP-level call properties, as `grpc.call_attributes`.
    CallAttributes,
    /// Serialized incoming metadata, as `grpc.headers`.
    Headers,
}

pub(crate) mod keys {
    pub const METHOD_NAME: &str = "grpc.method_name";
    pub const METHOD_TYPE: &str = "grpc.method_type";
    pub const DEADLINE_MILLIS: &str = "grpc.deadline_millis";
    pub const COMPRESSOR: &str = "grpc.compressor";
    pub const AUTHORITY: &str = "grpc.authority";
    pub const CALL_OPTIONS: &str = "grpc.call_options";
    pub const HEADERS: &str = "grpc.headers";
    pub const CALL_ATTRIBUTES: &str = "grpc.call_attributes";
    pub const ERROR: &str = "error";
}

/// Literal recorded for attributes whose source is absent from the call.
pub(crate) const NULL_VALUE: &str = "null";

/// Parses a `grpc-timeout` metadata value into remaining milliseconds.
///
/// The wire format is up to eight ASCII digits followed by a single unit
/// character (`H`, `M`, `S`, `m`, `u`, `n`). Sub-millisecond values truncate
/// toward zero.
pub(crate) fn grpc_timeout_millis(value: &str) -> Option<u64> {
    if value.len() < 2 || !value.is_ascii() {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.len() > 8 {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    match unit {
        "H" => Some(amount * 3_600_000),
        "M" => Some(amount * 60_000),
        "S" => Some(amount * 1_000),
        "m" => Some(amount),
        "u" => Some(amount / 1_000),
        "n" => Some(amount / 1_000_000),
        _ => None,
    }
}
