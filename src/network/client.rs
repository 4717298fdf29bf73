//! HTTP client for forwarding requests to the remote API and the webhook target

use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_tls::HttpsConnector;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, warn};

use crate::cassette::{Headers, HttpRequest, HttpResponse};
use crate::{PlaybackError, Result};

/// Request headers that describe the inbound hop rather than the request itself
const SKIPPED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "transfer-encoding",
    "keep-alive",
];

/// HTTP client for forwarding requests to `http://` and `https://` destinations
#[derive(Clone)]
pub struct HttpClient {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    timeout: Duration,
}

impl HttpClient {
    /// Create a new HTTP client with the given per-request timeout
    ///
    /// # Errors
    ///
    /// Returns error if the platform TLS backend cannot be initialized
    pub fn new(timeout: Duration) -> Result<Self> {
        let tls = native_tls::TlsConnector::new().map_err(|e| PlaybackError::Tls(e.to_string()))?;

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        let connector = HttpsConnector::from((http, tokio_native_tls::TlsConnector::from(tls)));

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build(connector);

        Ok(Self { client, timeout })
    }

    /// Forward `request` to `destination` and read the full response
    ///
    /// The whole exchange, body included, is bounded by the client timeout.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be built, fails in transit or times out
    pub async fn forward(&self, request: &HttpRequest, destination: &str) -> Result<HttpResponse> {
        let uri = destination
            .parse::<Uri>()
            .map_err(|e| PlaybackError::Transport {
                url: destination.to_string(),
                reason: format!("invalid URI: {e}"),
            })?;

        debug!("Forwarding {} to {}", request.method, uri);

        let method = request.method.parse::<Method>().map_err(|e| {
            PlaybackError::Other(format!("Invalid HTTP method '{}': {e}", request.method))
        })?;

        let mut http_request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::copy_from_slice(&request.body)))
            .map_err(|e| PlaybackError::Other(format!("Failed to build request: {e}")))?;
        request
            .headers
            .write_to(http_request.headers_mut(), SKIPPED_REQUEST_HEADERS);

        let exchange = async {
            let response = self.client.request(http_request).await.map_err(|e| {
                warn!("Request to {destination} failed: {e}");
                PlaybackError::Transport {
                    url: destination.to_string(),
                    reason: e.to_string(),
                }
            })?;

            let status_code = response.status().as_u16();
            let headers = Headers::from_header_map(response.headers());

            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| PlaybackError::Transport {
                    url: destination.to_string(),
                    reason: format!("failed to read response body: {e}"),
                })?
                .to_bytes();

            Ok::<_, PlaybackError>(HttpResponse {
                headers,
                body: body.to_vec(),
                status_code,
            })
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| PlaybackError::Timeout {
                url: destination.to_string(),
                secs: self.timeout.as_secs(),
            })?
    }
}

/// Join the remote base URL and an inbound request target
#[must_use]
pub fn join_url(base: &str, path_and_query: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path_and_query)
}
