//! Response bodies served by the proxy

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Frame, SizeHint};
use hyper::{Response, StatusCode};
use tokio::sync::oneshot;
use tracing::warn;

use crate::cassette::HttpResponse;

/// Body type of every response the proxy produces
pub type ProxyBody = UnsyncBoxBody<Bytes, Infallible>;

/// Response headers that hyper recomputes for the outbound hop
const SKIPPED_RESPONSE_HEADERS: &[&str] = &["connection", "transfer-encoding", "keep-alive"];

/// Build a body from owned bytes
pub fn full(bytes: impl Into<Bytes>) -> ProxyBody {
    Full::new(bytes.into()).boxed_unsync()
}

/// Build an empty body
#[must_use]
pub fn empty() -> ProxyBody {
    full(Bytes::new())
}

/// Whether a tracked body was handed over in full before being dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The server consumed every byte of the body
    Complete,
    /// The body was dropped early, usually because the client went away
    Aborted,
}

/// Body that reports when the HTTP server is done with it
///
/// hyper drops the body once the last frame has been handed to the connection,
/// so the drop is the signal that the client response has been written.
pub struct TrackedBody {
    inner: Full<Bytes>,
    done: Option<oneshot::Sender<WriteOutcome>>,
}

impl TrackedBody {
    /// Wrap `bytes`, notifying `done` once the body is released
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>, done: oneshot::Sender<WriteOutcome>) -> Self {
        Self {
            inner: Full::new(bytes.into()),
            done: Some(done),
        }
    }
}

impl Body for TrackedBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for TrackedBody {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            let outcome = if self.inner.is_end_stream() {
                WriteOutcome::Complete
            } else {
                WriteOutcome::Aborted
            };
            // Nobody waits when no webhooks are pending
            let _ = done.send(outcome);
        }
    }
}

/// Build the client-facing response for a recorded or forwarded exchange
#[must_use]
pub fn to_hyper_response(recorded: &HttpResponse, body: ProxyBody) -> Response<ProxyBody> {
    let status = StatusCode::from_u16(recorded.status_code).unwrap_or_else(|_| {
        warn!(
            "Recorded status {} is not a valid HTTP status, sending 500",
            recorded.status_code
        );
        StatusCode::INTERNAL_SERVER_ERROR
    });

    let mut response = Response::new(body);
    *response.status_mut() = status;
    recorded
        .headers
        .write_to(response.headers_mut(), SKIPPED_RESPONSE_HEADERS);
    response
}
