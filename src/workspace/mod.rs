//! Content workspace backing the catalog tools.

pub mod memory;

pub use memory::{ContentItem, InMemoryWorkspace, Section, SourceItem};
