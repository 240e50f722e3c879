//! Streaming inference relay.
//!
//! A client message history is normalized for one provider, a single upstream
//! stream is opened, and its deltas are forwarded to the client as SSE frames
//! while being accumulated for persistence.

pub mod error;
pub mod frames;
pub mod messages;
pub mod providers;
pub mod session;
pub mod stream_relay;

pub use error::RelayError;
pub use frames::sse_response;
pub use session::StreamSession;
pub use stream_relay::{SessionOutcome, StreamRelay};
