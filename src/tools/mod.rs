//! Tool catalog, typed arguments and invocation types.

pub mod catalog;
pub mod invocation;
pub mod request;
pub mod types;

pub use catalog::{ToolFamily, ToolKind};
pub use invocation::{ToolExecutionResult, ToolInvocation, ToolOutput};
pub use request::*;
pub use types::{ParameterBuilder, ToolParameters};
