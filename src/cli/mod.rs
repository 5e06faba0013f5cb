//! Command-line front end: run a turn and print its events as SSE.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;

use crate::agent_loop::{AgentContext, ControllerSettings, GapDetector, PassController, ToolExecutor};
use crate::config::ScriptoriumConfig;
use crate::error::ScriptoriumError;
use crate::gate::ModeGate;
use crate::provider::openai::OpenAiEndpoint;
use crate::transport::sse_stream;
use crate::types::Mode;
use crate::workspace::InMemoryWorkspace;

/// Scriptorium agent CLI
#[derive(Parser, Debug)]
#[command(name = "scriptorium", version, about = "Streaming tool-calling agent for content workspaces")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one turn against a seeded in-memory workspace
    Chat(ChatArgs),
    /// List the tools permitted in a mode
    Tools(ToolsArgs),
}

#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Interaction mode (chat or agent)
    #[arg(short, long, default_value = "agent")]
    pub mode: String,

    /// Override the pass budget
    #[arg(long)]
    pub max_passes: Option<usize>,

    /// Config file (defaults to ~/.scriptorium/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Ask for a target before running edit requests that name none
    #[arg(long)]
    pub clarify: bool,

    /// User message
    pub prompt: String,
}

#[derive(Parser, Debug)]
pub struct ToolsArgs {
    #[arg(short, long, default_value = "agent")]
    pub mode: String,
}

/// Install the stderr log subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scriptorium=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub async fn run(cli: Cli) -> Result<(), ScriptoriumError> {
    match cli.command {
        Commands::Chat(args) => handle_chat(args).await,
        Commands::Tools(args) => handle_tools(&args),
    }
}

fn handle_tools(args: &ToolsArgs) -> Result<(), ScriptoriumError> {
    let mode = Mode::parse(&args.mode)?;
    for definition in ModeGate::definitions(mode) {
        println!("{:<24} {}", definition.name, definition.description);
    }
    Ok(())
}

async fn handle_chat(args: ChatArgs) -> Result<(), ScriptoriumError> {
    let mode = Mode::parse(&args.mode)?;
    let mut config = ScriptoriumConfig::load(args.config.as_deref())?;
    if let Some(max_passes) = args.max_passes {
        config.agent.max_passes = max_passes;
        config.validate()?;
    }

    let endpoint = Arc::new(OpenAiEndpoint::from_config(&config.endpoint)?);
    let executor = ToolExecutor::new(Arc::new(InMemoryWorkspace::seeded()))
        .with_retry_policy(config.retry_policy())
        .with_timeout(config.tool_timeout());
    let mut controller = PassController::new(endpoint, Arc::new(executor))
        .with_settings(ControllerSettings::from_config(&config));
    if args.clarify {
        controller = controller.with_clarifier(Arc::new(GapDetector::new()?));
    }
    let controller = Arc::new(controller);

    let ctx = AgentContext::builder()
        .conversation_id(uuid::Uuid::new_v4().to_string())
        .mode(mode)
        .user_message(args.prompt)
        .max_passes(config.agent.max_passes)
        .maybe_system_prompt(config.agent.system_prompt.clone())
        .build();

    let mut handle = controller.start_turn(ctx);
    if let Some(events) = handle.take_events() {
        let mut frames = sse_stream(events);
        let mut stdout = std::io::stdout();
        while let Some(frame) = frames.next().await {
            stdout.write_all(&frame)?;
            stdout.flush()?;
        }
    }
    let outcome = handle.wait().await?;
    tracing::info!(status = %outcome.status, passes = outcome.passes, "chat finished");
    match outcome.error {
        Some(error) => Err(ScriptoriumError::Stream(error)),
        None => Ok(()),
    }
}

/// Map an error to a user-facing line with a next step.
pub fn format_error_help(err: &ScriptoriumError) -> String {
    match err {
        ScriptoriumError::Authentication(msg) => {
            format!("Authentication failed: {msg}. Set SCRIPTORIUM_API_KEY or OPENAI_API_KEY")
        }
        ScriptoriumError::Configuration(msg) => {
            format!("Configuration error: {msg}. Check your .env or ~/.scriptorium/config.toml")
        }
        ScriptoriumError::ConfigParse(e) => format!("Could not parse config file: {e}"),
        ScriptoriumError::InvalidMode(_) => format!("{err}. Use --mode chat or --mode agent"),
        other => format!("{other}"),
    }
}
