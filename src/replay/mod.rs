//! Replay: answer live requests from a loaded cassette
//!
//! [`Comparator`] decides which recorded call answers a request,
//! [`match_request`] consumes it together with the webhooks recorded right after
//! it, and [`Replayer`] owns the cassette and delivers those webhooks before the
//! next request is matched.

mod comparator;
mod matcher;
mod replayer;

pub use comparator::{CompareFn, Comparator, Verdict};
pub use matcher::{find_match, match_request, Matched};
pub use replayer::{Replayed, Replayer};
