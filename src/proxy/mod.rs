//! Control plane and request routing

mod error_response;
mod routes;
mod server;

pub use error_response::{error_response, ERROR_TYPE};
pub use routes::{route, CONTROL_PREFIX};
pub use server::{PlaybackServer, Status};
