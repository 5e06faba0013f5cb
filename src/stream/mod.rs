//! Decoding of streamed model output.

pub mod assembler;
pub mod decoder;

pub use assembler::{Assembly, MalformedToolCall, Preparing, ToolCallAssembler};
pub use decoder::{decode_stream, ChunkStream, StreamDecoder};
