//! Network layer
//!
//! Outbound forwarding client, response bodies and the inbound accept loop.

mod body;
mod client;
mod listener;

pub use body::{empty, full, to_hyper_response, ProxyBody, TrackedBody, WriteOutcome};
pub use client::{join_url, HttpClient};
pub use listener::ProxyListener;

/// Timeout applied to every forwarded request
pub const FORWARD_TIMEOUT_SECS: u64 = 10;
