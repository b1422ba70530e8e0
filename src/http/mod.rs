pub mod client;
pub mod error;
pub mod request;

pub use client::{CancellableRequest, build_http_client, handle_json_response};
pub use request::ChatRequest;
