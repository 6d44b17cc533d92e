//! Call-scoped wrappers that observe a call's progress.
//!
//! gRPC maps one message onto one HTTP/2 DATA frame and carries the terminal
//! status in trailers (or, for trailers-only responses, in the response
//! headers). Wrapping the request and response bodies is therefore enough to
//! observe every lifecycle event the span cares about: messages in either
//! direction, half-close (end of the request stream), completion, and
//! cancellation (the wrappers dropped before a terminal frame).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Buf;
use http_body::{Body, Frame, SizeHint};
use opentelemetry::trace::Span;
use pin_project_lite::pin_project;

use crate::call::{grpc_status_code, grpc_status_message, SharedCallSpan};

/// Which stream of the call a [`TracedBody`] observes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BodyRole {
    ClientRequest,
    ClientResponse,
    ServerRequest,
    ServerResponse,
}

pin_project! {
    /// Body wrapper reporting gRPC frames to the span covering the call.
    ///
    /// Forwards every frame, poll result, and size hint unchanged; tracing is
    /// purely observational.
    pub struct TracedBody<B, S: Span> {
        #[pin]
        inner: B,
        call: SharedCallSpan<S>,
        role: BodyRole,
        done: bool,
    }
}

impl<B, S: Span> fmt::Debug for TracedBody<B, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracedBody")
            .field("role", &self.role)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<B, S: Span> TracedBody<B, S> {
    pub(crate) fn new(inner: B, call: SharedCallSpan<S>, role: BodyRole) -> Self {
        TracedBody {
            inner,
            call,
            role,
            done: false,
        }
    }
}

impl<B, S> Body for TracedBody<B, S>
where
    B: Body,
    B::Error: fmt::Display,
    S: Span,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let result = ready!(this.inner.poll_frame(cx));
        match &result {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    let size = data.remaining();
                    match *this.role {
                        BodyRole::ClientRequest => this.call.with(|call| call.message_sent()),
                        BodyRole::ClientResponse | BodyRole::ServerRequest => {
                            this.call.with(|call| call.message_received(size))
                        }
                        // Server-sent messages carry no lifecycle event.
                        BodyRole::ServerResponse => {}
                    }
                } else if let Some(trailers) = frame.trailers_ref() {
                    if response_role(*this.role) && !*this.done {
                        *this.done = true;
                        let code = grpc_status_code(trailers).unwrap_or(0);
                        let message = grpc_status_message(trailers);
                        this.call.with(|call| call.close(code, message));
                    }
                }
            }
            Some(Err(error)) => {
                if response_role(*this.role) && !*this.done {
                    *this.done = true;
                    let description = error.to_string();
                    this.call.with(|call| call.fail(description));
                }
            }
            None => {
                if !*this.done {
                    *this.done = true;
                    match *this.role {
                        BodyRole::ClientRequest | BodyRole::ServerRequest => {
                            this.call.with(|call| call.half_closed())
                        }
                        // End of the response stream without trailers still
                        // terminates the call.
                        BodyRole::ClientResponse | BodyRole::ServerResponse => {
                            this.call.with(|call| call.close(0, None))
                        }
                    }
                }
            }
        }
        Poll::Ready(result)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

fn response_role(role: BodyRole) -> bool {
    matches!(role, BodyRole::ClientResponse | BodyRole::ServerResponse)
}

pin_project! {
    /// Response future of a traced call.
    ///
    /// Wraps the response body on success, records transport failures, and
    /// recognizes trailers-only responses (a `grpc-status` response header)
    /// as immediately terminal.
    pub struct TracedCallFuture<F, S: Span> {
        #[pin]
        inner: F,
        call: SharedCallSpan<S>,
        response_role: BodyRole,
    }
}

impl<F, S: Span> TracedCallFuture<F, S> {
    pub(crate) fn client(inner: F, call: SharedCallSpan<S>) -> Self {
        TracedCallFuture {
            inner,
            call,
            response_role: BodyRole::ClientResponse,
        }
    }

    pub(crate) fn server(inner: F, call: SharedCallSpan<S>) -> Self {
        TracedCallFuture {
            inner,
            call,
            response_role: BodyRole::ServerResponse,
        }
    }
}

impl<F, S, ResB, E> Future for TracedCallFuture<F, S>
where
    F: Future<Output = Result<http::Response<ResB>, E>>,
    S: Span,
    ResB: Body,
    E: fmt::Display,
{
    type Output = Result<http::Response<TracedBody<ResB, S>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));
        Poll::Ready(match result {
            Ok(response) => {
                let (parts, body) = response.into_parts();
                this.call.with(|call| call.response_headers(&parts.headers));
                if let Some(code) = grpc_status_code(&parts.headers) {
                    let message = grpc_status_message(&parts.headers);
                    this.call.with(|call| call.close(code, message));
                }
                let body = TracedBody::new(body, this.call.clone(), *this.response_role);
                Ok(http::Response::from_parts(parts, body))
            }
            Err(error) => {
                let description = error.to_string();
                this.call.with(|call| call.fail(description));
                Err(error)
            }
        })
    }
}
