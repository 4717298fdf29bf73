//! Playback - HTTP record/replay proxy
//!
//! Sits between an application and a remote HTTP API. In record mode every API
//! call and webhook delivery is forwarded and captured into a YAML cassette; in
//! replay mode the cassette answers the same calls offline, in order, and
//! redelivers the recorded webhooks after the call that triggered them.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::multiple_crate_versions
)]

pub mod cassette;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod network;
pub mod proxy;
pub mod recording;
pub mod replay;

pub use error::{PlaybackError, Result};
