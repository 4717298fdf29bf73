//! Request fingerprinting for keyed replay matching

use sha2::{Digest, Sha256};

use crate::cassette::HttpRequest;

/// SHA-256 digest identifying a request for matching purposes
pub type Fingerprint = [u8; 32];

/// Compute SHA-256 fingerprint of a request
///
/// The fingerprint includes:
/// 1. Method (uppercase normalized)
/// 2. Path (normalized)
/// 3. Query parameters (decoded, sorted)
/// 4. Body
///
/// Headers are left out: clients stamp per-run values such as idempotency
/// keys and user agents into them.
#[must_use]
pub fn fingerprint_request(request: &HttpRequest) -> Fingerprint {
    let mut hasher = Sha256::new();

    // 1. Method (uppercase normalized)
    let method = request.method.to_uppercase();
    hasher.update((method.len() as u32).to_le_bytes());
    hasher.update(method.as_bytes());

    // 2. Path (normalized)
    let path = normalize_path(request.url.path());
    hasher.update((path.len() as u32).to_le_bytes());
    hasher.update(path.as_bytes());

    // 3. Query parameters (sorted)
    let mut query = request.query_pairs();
    query.sort();
    hasher.update((query.len() as u32).to_le_bytes());
    for (key, value) in &query {
        hasher.update((key.len() as u32).to_le_bytes());
        hasher.update(key.as_bytes());
        hasher.update((value.len() as u32).to_le_bytes());
        hasher.update(value.as_bytes());
    }

    // 4. Body
    hasher.update((request.body.len() as u32).to_le_bytes());
    hasher.update(&request.body);

    hasher.finalize().into()
}

/// Short hex prefix for log lines
#[must_use]
pub fn short_hex(fingerprint: &Fingerprint) -> String {
    hex::encode(&fingerprint[..8])
}

/// Normalize a URL path
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();

    // Ensure leading slash, drop trailing slash
    let with_slash = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    };

    if with_slash.len() > 1 {
        with_slash.trim_end_matches('/').to_string()
    } else {
        with_slash
    }
}
