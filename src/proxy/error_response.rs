//! JSON error envelope written for every failed request

use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::Response;
use serde::Serialize;
use tracing::error;

use crate::network::{full, ProxyBody};
use crate::PlaybackError;

/// Value of the `type` field in every error envelope
pub const ERROR_TYPE: &str = "stripe_playback_error";

#[derive(Debug, Serialize)]
struct ErrorEnvelope<'a> {
    error: ErrorBody<'a>,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    doc_url: &'a str,
    message: String,
    param: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
}

/// Build the error response for `err`, with the status its kind maps to
///
/// The body is a JSON envelope, or plain text if encoding fails.
#[must_use]
pub fn error_response(err: &PlaybackError) -> Response<ProxyBody> {
    let status = err.status_code();
    let envelope = ErrorEnvelope {
        error: ErrorBody {
            code: "",
            doc_url: "",
            message: err.to_string(),
            param: "",
            kind: ERROR_TYPE,
        },
    };

    let (content_type, body) = match serde_json::to_vec_pretty(&envelope) {
        Ok(json) => ("application/json", json),
        Err(_) => ("text/plain", format!("{err}\n").into_bytes()),
    };

    error!("<-- {}: {}", status.as_u16(), err);

    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
