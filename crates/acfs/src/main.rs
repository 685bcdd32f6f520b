//! ACFS CLI - resumable server provisioning from a module manifest
//!
//! This is the main entry point for the `acfs` command-line interface.

mod cli;
mod commands;
mod output;
mod progress;

use acfs_core::Error;
use acfs_installer::EngineFailure;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize rustls crypto provider (required for rustls 0.23+)
    // This must be done before any TLS operations
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Plan(args) => commands::plan::run(args, &cli).await,
        Commands::Install(args) => commands::install::run(args, &cli).await,
        Commands::Status(args) => commands::status::run(args, &cli).await,
        Commands::Modules(args) => commands::modules::run(args, &cli).await,
        Commands::Reset(args) => commands::reset::run(args, &cli).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            output::error(&format!("{:#}", err));
            ExitCode::from(exit_code(&err))
        }
    }
}

/// 2 for bad input (manifest or selection), 1 for everything else
fn exit_code(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<EngineFailure>().is_some() {
        return 1;
    }
    match err.downcast_ref::<Error>() {
        Some(Error::Validation(_) | Error::Selection(_) | Error::YamlParse(_)) => 2,
        _ => 1,
    }
}

/// Initialize tracing with appropriate verbosity
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}
