//! Recording: capture live API calls and webhook deliveries

mod recorder;

pub use recorder::{CassetteSink, Recorder};

use serde::Deserialize;

/// Label used in logs when a webhook body carries no event type
pub const UNKNOWN_EVENT: &str = "unknown";

#[derive(Deserialize)]
struct EventEnvelope {
    #[serde(rename = "type")]
    kind: String,
}

/// Event type of a webhook body, for log lines
///
/// Bodies that are not JSON objects with a string `type` yield [`UNKNOWN_EVENT`].
#[must_use]
pub fn event_type(body: &[u8]) -> String {
    serde_json::from_slice::<EventEnvelope>(body)
        .map_or_else(|_| UNKNOWN_EVENT.to_string(), |event| event.kind)
}
