pub mod chunks;
pub mod recovery;
pub mod sse;

pub use chunks::{StreamEvent, extract_error, extract_response_text};
pub use sse::{DecodedLine, EventDecoder};
