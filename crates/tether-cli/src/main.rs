//! Tether CLI entry point.

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use tether_cli::cli::Cli;
use tether_cli::commands;

fn main() {
    // Picks up TETHER_* runner settings from a local .env
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level().to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match commands::execute(&cli) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
