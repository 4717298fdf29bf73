//! Wire value types for recorded HTTP exchanges

use std::fmt;

use http_body_util::BodyExt;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Uri};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{PlaybackError, Result};

/// Multi-valued header mapping that keeps first-seen name order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, Vec<String>)>);

impl Headers {
    /// Create an empty header mapping
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, grouping it under an existing name if present
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some((_, values)) => values.push(value),
            None => self.0.push((name, vec![value])),
        }
    }

    /// All values recorded for `name` (case-insensitive)
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[String] {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map_or(&[][..], |(_, values)| values.as_slice())
    }

    /// First value recorded for `name` (case-insensitive)
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    /// Iterate over names and their values in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    /// Number of distinct header names
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no headers are present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Capture a hyper header map
    #[must_use]
    pub fn from_header_map(map: &HeaderMap) -> Self {
        let mut headers = Self::new();
        for (name, value) in map {
            headers.append(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }
        headers
    }

    /// Write every value into a hyper header map, skipping names in `skip`
    ///
    /// Names or values that hyper refuses are dropped with a warning.
    pub fn write_to(&self, map: &mut HeaderMap, skip: &[&str]) {
        for (name, values) in self.iter() {
            if skip.iter().any(|s| s.eq_ignore_ascii_case(name)) {
                continue;
            }
            let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
                tracing::warn!("Dropping invalid header name {name:?}");
                continue;
            };
            for value in values {
                match HeaderValue::from_bytes(value.as_bytes()) {
                    Ok(v) => {
                        map.append(header_name.clone(), v);
                    }
                    Err(_) => tracing::warn!("Dropping invalid value for header {name}"),
                }
            }
        }
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, values) in &self.0 {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct HeadersVisitor;

        impl<'de> Visitor<'de> for HeadersVisitor {
            type Value = Headers;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of header names to lists of values")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Headers, A::Error> {
                let mut headers = Headers::new();
                while let Some((name, values)) = access.next_entry::<String, Vec<String>>()? {
                    for value in values {
                        headers.append(name.clone(), value);
                    }
                }
                Ok(headers)
            }
        }

        deserializer.deserialize_map(HeadersVisitor)
    }
}

/// A captured HTTP request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    /// HTTP method
    pub method: String,
    /// Request body
    #[serde(with = "body_repr")]
    pub body: Vec<u8>,
    /// Request headers
    pub headers: Headers,
    /// Request target (path and query)
    #[serde(with = "uri_repr")]
    pub url: Uri,
}

impl HttpRequest {
    /// Create a request with no headers and no body
    #[must_use]
    pub fn new(method: impl Into<String>, url: Uri) -> Self {
        Self {
            method: method.into(),
            body: Vec::new(),
            headers: Headers::new(),
            url,
        }
    }

    /// Read a hyper request fully into memory
    ///
    /// # Errors
    ///
    /// Returns error if the body cannot be read or exceeds `max_body_size`
    pub async fn from_hyper<B>(request: hyper::Request<B>, max_body_size: usize) -> Result<Self>
    where
        B: hyper::body::Body,
        B::Error: fmt::Display,
    {
        let (parts, body) = request.into_parts();

        let collected = body
            .collect()
            .await
            .map_err(|e| PlaybackError::Other(format!("Failed to read request body: {e}")))?
            .to_bytes();

        if collected.len() > max_body_size {
            return Err(PlaybackError::DataTooLarge {
                size: collected.len(),
                limit: max_body_size,
            });
        }

        Ok(Self {
            method: parts.method.to_string(),
            body: collected.to_vec(),
            headers: Headers::from_header_map(&parts.headers),
            url: parts.uri,
        })
    }

    /// Path plus query, as sent on the request line
    #[must_use]
    pub fn path_and_query(&self) -> &str {
        self.url.path_and_query().map_or("/", |pq| pq.as_str())
    }

    /// Decoded query parameters in order of appearance
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        query_pairs(&self.url)
    }
}

/// A captured HTTP response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    /// Response headers
    pub headers: Headers,
    /// Response body
    #[serde(with = "body_repr")]
    pub body: Vec<u8>,
    /// HTTP status code
    pub status_code: u16,
}

impl HttpResponse {
    /// Create a response with no headers
    #[must_use]
    pub fn new(status_code: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: Headers::new(),
            body: body.into(),
            status_code,
        }
    }
}

/// Decode the query string of `uri` into key/value pairs
#[must_use]
pub fn query_pairs(uri: &Uri) -> Vec<(String, String)> {
    let Some(query) = uri.query() else {
        return Vec::new();
    };

    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced).map_or(spaced.clone(), std::borrow::Cow::into_owned)
}

/// Bodies are stored as plain strings when they are UTF-8 and as `{hex: ...}` otherwise
mod body_repr {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize)]
    #[serde(untagged)]
    enum BodyOut<'a> {
        Text(&'a str),
        Binary { hex: String },
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BodyIn {
        Text(String),
        Binary { hex: String },
    }

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let repr = match std::str::from_utf8(body) {
            Ok(text) => BodyOut::Text(text),
            Err(_) => BodyOut::Binary {
                hex: hex::encode(body),
            },
        };
        repr.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match BodyIn::deserialize(deserializer)? {
            BodyIn::Text(text) => Ok(text.into_bytes()),
            BodyIn::Binary { hex } => hex::decode(hex).map_err(serde::de::Error::custom),
        }
    }
}

mod uri_repr {
    use hyper::Uri;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(uri: &Uri, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(uri)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Uri, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<Uri>().map_err(serde::de::Error::custom)
    }
}
