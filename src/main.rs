//! postgres-autoconf - PostgreSQL authentication policy at container start
//!
//! Runs before the database daemon; exits non-zero when the configuration
//! cannot be compiled so the container does not start with a broken policy.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use postgres_autoconf::{
    cli::{Cli, Command},
    config::{self, Snapshot},
    pipeline, setup_tracing,
};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let snapshot = match config::resolve(&cli.inputs, cli.layout()) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Check) => run_check(&snapshot),
        Some(Command::Apply) | None => run_apply(&snapshot),
    }
}

/// Dry run: print the access-control file.
fn run_check(snapshot: &Snapshot) -> ExitCode {
    let plan = pipeline::plan(snapshot);
    print!("{}", plan.files.hba);
    ExitCode::SUCCESS
}

/// Provision and render.
fn run_apply(snapshot: &Snapshot) -> ExitCode {
    info!(
        conf_dir = %snapshot.layout.conf_dir.display(),
        version = env!("CARGO_PKG_VERSION"),
        "Configuring PostgreSQL authentication"
    );

    match pipeline::apply(snapshot) {
        Ok(report) => {
            info!(
                changed = report.changed(),
                certificates = report.certificates.is_usable(),
                "Configuration complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Configuration failed");
            ExitCode::FAILURE
        }
    }
}
