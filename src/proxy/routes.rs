//! Request routing: control endpoints, webhooks and application traffic

use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode, Uri};
use tracing::{info, warn};

use crate::cassette::query_pairs;
use crate::network::{empty, full, ProxyBody};
use crate::{PlaybackError, Result};

use super::{error_response, PlaybackServer};

/// Prefix shared by every control endpoint
pub const CONTROL_PREFIX: &str = "/playback/";

const MODE_PREFIX: &str = "/playback/mode/";
const SETROOT_PATH: &str = "/playback/cassette/setroot";
const LOAD_PATH: &str = "/playback/cassette/load";
const EJECT_PATH: &str = "/playback/cassette/eject";
const WEBHOOK_PATH: &str = "/playback/webhooks";

/// Entry point for every inbound request
///
/// Never fails at the hyper level; errors become JSON error responses.
pub async fn route(
    server: Arc<PlaybackServer>,
    request: Request<Incoming>,
) -> std::result::Result<Response<ProxyBody>, Infallible> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let path = uri.path();

    let result = if path == WEBHOOK_PATH {
        match require_method(&method, &uri, &[Method::POST]) {
            Ok(()) => server.handle_webhook(request).await,
            Err(e) => Err(e),
        }
    } else if path.starts_with(CONTROL_PREFIX) {
        control(&server, &method, &uri).await
    } else {
        server.handle_api(request).await
    };

    Ok(result.unwrap_or_else(|e| error_response(&e)))
}

async fn control(server: &PlaybackServer, method: &Method, uri: &Uri) -> Result<Response<ProxyBody>> {
    let path = uri.path();
    let allowed = [Method::GET, Method::POST];

    if let Some(mode) = path.strip_prefix(MODE_PREFIX) {
        require_method(method, uri, &allowed)?;
        server.switch_mode(mode).await?;
        return Ok(ok());
    }

    match path {
        SETROOT_PATH => {
            require_method(method, uri, &allowed)?;
            let dir = query_param(uri, "dir")?;
            server.set_cassette_dir(Path::new(&dir)).await?;
            Ok(ok())
        }
        LOAD_PATH => {
            require_method(method, uri, &allowed)?;
            let filepath = query_param(uri, "filepath")?;
            server.load_cassette(&filepath).await?;
            Ok(ok())
        }
        EJECT_PATH => {
            require_method(method, uri, &allowed)?;
            server.eject_cassette().await?;
            Ok(ok())
        }
        _ => Ok(not_a_control_endpoint(method, uri)),
    }
}

fn require_method(method: &Method, uri: &Uri, allowed: &[Method]) -> Result<()> {
    if allowed.contains(method) {
        Ok(())
    } else {
        Err(PlaybackError::MethodNotAllowed {
            method: method.to_string(),
            path: uri.path().to_string(),
        })
    }
}

/// First value of a query parameter; later duplicates are ignored
fn query_param(uri: &Uri, name: &'static str) -> Result<String> {
    let mut values = query_pairs(uri)
        .into_iter()
        .filter(|(key, _)| key == name)
        .map(|(_, value)| value);

    let first = values.next().ok_or(PlaybackError::MissingQueryParam(name))?;
    if values.next().is_some() {
        warn!(
            "Multiple \"{}\" query param values given, ignoring all except first: {}",
            name, first
        );
    }
    Ok(first)
}

fn ok() -> Response<ProxyBody> {
    Response::new(empty())
}

fn not_a_control_endpoint(method: &Method, uri: &Uri) -> Response<ProxyBody> {
    info!("<-- 404: {} {}", method, uri);

    let message = format!(
        "\"{}\" is not a valid {} control endpoint. Run `playback --help` for a comprehensive list.\n",
        uri,
        CONTROL_PREFIX
    );
    let mut response = Response::new(full(message));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
