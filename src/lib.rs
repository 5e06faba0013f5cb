//! Scriptorium: streaming tool-calling agent orchestrator.
//!
//! A turn streams a model response, assembles the tool calls it asks for,
//! gates them by interaction mode, executes them with retries, and loops
//! until the model answers in text or the pass budget runs out. Every step
//! is reported as an ordered event that can be framed as SSE.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use scriptorium::prelude::*;
//! use scriptorium::provider::openai::OpenAiEndpoint;
//! use scriptorium::workspace::InMemoryWorkspace;
//!
//! # async fn example() -> scriptorium::error::Result<()> {
//! let config = ScriptoriumConfig::load(None)?;
//! let endpoint = Arc::new(OpenAiEndpoint::from_config(&config.endpoint)?);
//! let executor = Arc::new(ToolExecutor::new(Arc::new(InMemoryWorkspace::seeded())));
//! let controller = Arc::new(PassController::new(endpoint, executor));
//!
//! let ctx = AgentContext::builder()
//!     .conversation_id("conv-1")
//!     .mode(Mode::Agent)
//!     .user_message("Summarize my drafts")
//!     .build();
//! let outcome = controller.start_turn(ctx).wait().await?;
//! println!("{}", outcome.message);
//! # Ok(())
//! # }
//! ```

pub mod agent_loop;
pub mod config;
pub mod error;
pub mod gate;
pub mod prelude;
pub mod provider;
pub mod stream;
pub mod tools;
pub mod transport;
pub mod types;
pub mod util;
pub mod workspace;

#[cfg(feature = "cli")]
pub mod cli;
