//! Outbound transports for turn events.

pub mod sse;

pub use sse::{encode_sse, sse_stream, SSE_CONTENT_TYPE};
