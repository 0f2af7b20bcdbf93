// ABOUTME: crew CLI entry point
// ABOUTME: Parses arguments, runs the command, maps failures to exit codes

use clap::Parser;
use crew::{run, Cli};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (ignore errors if not found)
    let _ = dotenvy::dotenv();

    crew_log::init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err.message());
            err.exit_code()
        }
    }
}
