//! Scriptorium CLI binary entry point.

use clap::Parser;
use scriptorium::cli::{format_error_help, init_tracing, run, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", format_error_help(&e));
        std::process::exit(1);
    }
}
