//! Per-call span state machine.
//!
//! A [`CallSpan`] owns the span covering one RPC call and turns lifecycle
//! callbacks into span events according to the configured `streaming` and
//! `verbose` flags. The span is finished exactly once: the first terminal
//! event wins and everything after it is ignored, and dropping the last
//! handle without a terminal event counts as cancellation.

use std::sync::{Arc, Mutex};

use opentelemetry::trace::{Span, Status};
use opentelemetry::KeyValue;

use crate::attributes::keys;

pub(crate) mod events {
    pub const CALL_STARTED: &str = "call started";
    pub const MESSAGE_SENT: &str = "message sent";
    pub const FINISHED_SENDING: &str = "finished sending messages";
    pub const RESPONSE_HEADERS: &str = "response headers received";
    pub const RESPONSE_RECEIVED: &str = "response received";
    pub const MESSAGE_RECEIVED: &str = "message received";
    pub const CLIENT_FINISHED_SENDING: &str = "client finished sending messages";
    pub const CALL_CLOSED: &str = "call closed";
    pub const CALL_COMPLETED: &str = "call completed";
    pub const CALL_FAILED: &str = "call failed";
    pub const CALL_CANCELLED: &str = "call cancelled";
}

/// Which side of the call the span covers. Event vocabulary differs slightly
/// between the two.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CallRole {
    Client,
    Server,
}

pub(crate) struct CallSpan<S: Span> {
    role: CallRole,
    span: S,
    streaming: bool,
    verbose: bool,
    finished: bool,
}

impl<S: Span> CallSpan<S> {
    pub(crate) fn new(role: CallRole, span: S, streaming: bool, verbose: bool) -> Self {
        CallSpan {
            role,
            span,
            streaming,
            verbose,
            finished: false,
        }
    }

    pub(crate) fn set_attribute(&mut self, attribute: KeyValue) {
        if !self.finished {
            self.span.set_attribute(attribute);
        }
    }

    pub(crate) fn started(&mut self) {
        if !self.finished && self.verbose {
            self.span.add_event(events::CALL_STARTED, Vec::new());
        }
    }

    pub(crate) fn message_sent(&mut self) {
        if !self.finished && (self.streaming || self.verbose) {
            self.span.add_event(events::MESSAGE_SENT, Vec::new());
        }
    }

    pub(crate) fn half_closed(&mut self) {
        if !self.finished && self.streaming {
            let name = match self.role {
                CallRole::Client => events::FINISHED_SENDING,
                CallRole::Server => events::CLIENT_FINISHED_SENDING,
            };
            self.span.add_event(name, Vec::new());
        }
    }

    pub(crate) fn response_headers(&mut self, headers: &http::HeaderMap) {
        if !self.finished && self.role == CallRole::Client && self.verbose {
            self.span.add_event(
                events::RESPONSE_HEADERS,
                vec![KeyValue::new("headers", format!("{headers:?}"))],
            );
        }
    }

    pub(crate) fn message_received(&mut self, size: usize) {
        if !self.finished && (self.streaming || self.verbose) {
            match self.role {
                CallRole::Client => self.span.add_event(events::RESPONSE_RECEIVED, Vec::new()),
                CallRole::Server => self.span.add_event(
                    events::MESSAGE_RECEIVED,
                    vec![KeyValue::new("message.size", size as i64)],
                ),
            }
        }
    }

    /// Terminal: the call closed with a gRPC status code.
    pub(crate) fn close(&mut self, code: i32, message: Option<String>) {
        if self.finished {
            return;
        }
        if code == 0 {
            if self.verbose {
                let name = match self.role {
                    CallRole::Client => events::CALL_CLOSED,
                    CallRole::Server => events::CALL_COMPLETED,
                };
                self.span.add_event(name, Vec::new());
            }
        } else {
            let description = status_description(code, message);
            if self.verbose {
                let name = match self.role {
                    CallRole::Client => events::CALL_FAILED,
                    CallRole::Server => events::CALL_COMPLETED,
                };
                self.span.add_event(
                    name,
                    vec![KeyValue::new("description", description.clone())],
                );
            }
            self.span.set_attribute(KeyValue::new(keys::ERROR, true));
            self.span.set_status(Status::error(description));
        }
        self.finish();
    }

    /// Terminal: the call failed below the gRPC layer (transport error).
    pub(crate) fn fail(&mut self, description: String) {
        if self.finished {
            return;
        }
        if self.verbose {
            self.span.add_event(
                events::CALL_FAILED,
                vec![KeyValue::new("description", description.clone())],
            );
        }
        self.span.set_attribute(KeyValue::new(keys::ERROR, true));
        self.span.set_status(Status::error(description));
        self.finish();
    }

    /// Terminal: the call was abandoned before completing. Always logged.
    pub(crate) fn cancel(&mut self) {
        if self.finished {
            return;
        }
        self.span.add_event(events::CALL_CANCELLED, Vec::new());
        self.finish();
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.span.end();
        }
    }
}

impl<S: Span> Drop for CallSpan<S> {
    fn drop(&mut self) {
        // No terminal event means the call never ran to completion.
        self.cancel();
    }
}

/// Handle shared between the request body, response future, and response
/// body of one call. All span bookkeeping is synchronous and brief, so a
/// plain mutex suffices; a poisoned lock is recovered since tracing is
/// best-effort.
pub(crate) struct SharedCallSpan<S: Span>(Arc<Mutex<CallSpan<S>>>);

impl<S: Span> SharedCallSpan<S> {
    pub(crate) fn new(call: CallSpan<S>) -> Self {
        SharedCallSpan(Arc::new(Mutex::new(call)))
    }

    pub(crate) fn with(&self, f: impl FnOnce(&mut CallSpan<S>)) {
        let mut guard = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard);
    }
}

impl<S: Span> Clone for SharedCallSpan<S> {
    fn clone(&self) -> Self {
        SharedCallSpan(Arc::clone(&self.0))
    }
}

fn status_description(code: i32, message: Option<String>) -> String {
    let code = tonic::Code::from_i32(code);
    match message {
        Some(message) if !message.is_empty() => {
            format!("{}: {}", code.description(), message)
        }
        _ => code.description().to_owned(),
    }
}

/// Reads the `grpc-status` code from response headers or trailers.
pub(crate) fn grpc_status_code(headers: &http::HeaderMap) -> Option<i32> {
    headers
        .get("grpc-status")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

/// Reads the `grpc-message` status detail, when present.
pub(crate) fn grpc_status_message(headers: &http::HeaderMap) -> Option<String> {
    headers
        .get("grpc-message")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}
