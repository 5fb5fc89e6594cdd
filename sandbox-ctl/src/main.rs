//! Sandbox controller CLI - launch programs through the sandbox portal

mod cli;
mod commands;
mod logging;
mod runner;

use std::path::Path;

use clap::Parser;
use cli::{Cli, Commands};
use commands::{check_requirements, print_level};
use console::style;
use runner::run_in_portal;
use sandbox_rs::{PortalConfig, SandboxController};

fn load_config(path: Option<&Path>) -> Result<PortalConfig, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(PortalConfig::default());
    };
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let config = serde_json::from_str(&content)
        .map_err(|e| format!("invalid config {}: {}", path.display(), e))?;
    Ok(config)
}

fn fail(e: impl std::fmt::Display) -> ! {
    eprintln!("{} {}", style("error:").red().bold(), e);
    std::process::exit(1);
}

fn main() {
    let cli = Cli::parse();

    logging::init_logger(cli.verbose);

    let config = load_config(cli.config.as_deref()).unwrap_or_else(|e| fail(e));
    let controller = SandboxController::new(config).unwrap_or_else(|e| fail(e));

    match cli.command {
        Commands::Level => print_level(&controller),
        Commands::Check => {
            if !check_requirements(&controller) {
                std::process::exit(1);
            }
        }
        Commands::Run(args) => {
            let code = run_in_portal(&controller, &args).unwrap_or_else(|e| fail(e));
            // Exit skips destructors; stop the bus worker first
            drop(controller);
            std::process::exit(code);
        }
    }
}
