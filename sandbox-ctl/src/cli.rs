use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sandbox-ctl")]
#[command(version, about = "Launch programs through the sandbox portal", long_about = None)]
#[command(after_help = "EXAMPLES:
    # Show how deeply this process is sandboxed
    sandbox-ctl level

    # Launch a program in a fresh sandbox and wait for it
    sandbox-ctl run -- ls -l /app
    sandbox-ctl run --clear-env --env LANG=C --cwd /var/tmp -- env
    sandbox-ctl run --share-gpu --expose-ro ~/Documents -- viewer

    # Check marker file and portal availability
    sandbox-ctl check
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Portal configuration file (JSON)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the sandbox level of this process
    Level,

    /// Launch a program through the portal and wait for it
    Run(RunArgs),

    /// Check sandbox marker and portal availability
    Check,
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Working directory of the child
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Set an environment variable (repeatable)
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    pub env: Vec<(String, String)>,

    /// Start from an empty environment
    #[arg(long)]
    pub clear_env: bool,

    /// Expose a path read-only inside the child's sandbox (repeatable)
    #[arg(long, value_name = "PATH")]
    pub expose_ro: Vec<PathBuf>,

    /// Kill the child when this process goes away
    #[arg(long)]
    pub kill_on_exit: bool,

    /// Share the display server
    #[arg(long)]
    pub share_display: bool,

    /// Share the sound server
    #[arg(long)]
    pub share_sound: bool,

    /// Share GPU devices
    #[arg(long)]
    pub share_gpu: bool,

    /// Allow talking to the session bus
    #[arg(long)]
    pub session_bus: bool,

    /// Allow talking to the accessibility bus
    #[arg(long)]
    pub a11y_bus: bool,

    /// Program to launch
    #[arg(value_name = "PROGRAM")]
    pub program: String,

    /// Program arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

fn parse_env(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, _)) if key.is_empty() => Err(format!("empty variable name in '{}'", s)),
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}
