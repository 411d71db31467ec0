//! `usage-governor` operator CLI.

mod cli;

use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn main() {
    // Before the subscriber, so RUST_LOG from .env applies.
    let dotenv_error = dotenv_problem(dotenvy::dotenv().map(drop));

    let args = cli::Cli::parse();

    let default_level = if args.verbose {
        "usage_governor=debug"
    } else {
        "usage_governor=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    if let Some(e) = dotenv_error {
        warn!("failed to load .env: {e}");
    }

    match cli::run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(2);
        }
    }
}

/// A missing `.env` is normal; anything else is worth reporting.
fn dotenv_problem(result: Result<(), dotenvy::Error>) -> Option<dotenvy::Error> {
    match result {
        Err(e) if !e.not_found() => Some(e),
        _ => None,
    }
}
