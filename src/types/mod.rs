//! Core types for Scriptorium.

pub mod generation;
pub mod message;
pub mod mode;
pub mod stream;

pub use generation::*;
pub use message::*;
pub use mode::*;
pub use stream::*;
