use console::style;
use log::{debug, info};
use sandbox_rs::{CommandLine, LaunchOptions, SandboxController, SandboxFlags, SpawnOptions};

use crate::cli::RunArgs;

/// Translate command-line arguments into a portal launch
pub fn launch_request(args: &RunArgs) -> (CommandLine, LaunchOptions, SpawnOptions) {
    let cmdline = CommandLine::new(&args.program).args(&args.args);

    let mut options = LaunchOptions {
        clear_environment: args.clear_env,
        kill_on_parent_death: args.kill_on_exit,
        current_directory: args.cwd.clone(),
        ..Default::default()
    };
    for (key, value) in &args.env {
        options = options.env(key, value);
    }

    let spawn_options = SpawnOptions {
        sandbox_expose_ro: args.expose_ro.clone(),
        sandbox_flags: SandboxFlags {
            share_display: args.share_display,
            share_sound: args.share_sound,
            share_gpu: args.share_gpu,
            session_bus: args.session_bus,
            a11y_bus: args.a11y_bus,
        },
    };

    (cmdline, options, spawn_options)
}

/// Launch, wait, and return the exit code to leave with
pub fn run_in_portal(
    controller: &SandboxController,
    args: &RunArgs,
) -> Result<i32, Box<dyn std::error::Error>> {
    let level = controller.get_sandbox_level();
    if !level.is_sandboxed() {
        return Err("not running inside a portal sandbox".into());
    }
    debug!("Sandbox level: {}", level);

    let (cmdline, options, spawn_options) = launch_request(args);
    info!("Launching: {} {:?}", args.program, args.args);

    let Some(process) = controller.launch_process(&cmdline, &options, &spawn_options)? else {
        return Err(format!("failed to launch {}", args.program).into());
    };
    info!("Launched as pid {}", process.pid());

    let Some(status) = controller.wait(process.pid())? else {
        return Err(format!("exit status of pid {} was lost", process.pid()).into());
    };

    let exit_code = status.exit_code();
    let exit_code_styled = if status.success() {
        style(exit_code).green().bold()
    } else {
        style(exit_code).red().bold()
    };

    print!(
        "{}={} | {}={}",
        style("pid").dim(),
        style(process.pid()).bold(),
        style("exit_code").dim(),
        exit_code_styled,
    );
    if let Some(signal) = status.signal() {
        print!(" | {}={}", style("signal").red(), style(signal).red().bold());
    }
    println!();

    Ok(exit_code)
}
