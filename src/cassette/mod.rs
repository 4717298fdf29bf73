//! Cassette data model and its on-disk format
//!
//! A cassette is the ordered list of exchanges captured in one session:
//! outgoing API calls and the incoming webhooks that followed them.

mod http;
mod interaction;
mod serializer;

pub use http::{query_pairs, Headers, HttpRequest, HttpResponse};
pub use interaction::{Cassette, Direction, Interaction};
pub use serializer::{CassetteSerializer, YamlSerializer};
