//! Basic portal launch example
//!
//! Must run inside a portal sandbox with the session bus available.

use sandbox_rs::{CommandLine, LaunchOptions, SandboxController, SandboxFlags, SpawnOptions};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Sandbox RS - Basic Example ===\n");

    println!("[1] Creating controller...");
    let controller = SandboxController::builder().build()?;
    println!("[*] Sandbox level: {}\n", controller.get_sandbox_level());

    println!("[2] Launching 'echo hello world' through the portal...");
    let cmdline = CommandLine::new("/bin/echo").args(["hello", "world"]);
    let options = LaunchOptions::default().env("LANG", "C");
    let spawn_options = SpawnOptions {
        sandbox_flags: SandboxFlags {
            share_display: true,
            ..Default::default()
        },
        ..Default::default()
    };

    let Some(process) = controller.launch_process(&cmdline, &options, &spawn_options)? else {
        println!("[!] The portal refused the launch or the child died early");
        return Ok(());
    };
    println!("[*] Running as pid {}", process.pid());
    println!("[*] Sandboxed: {}\n", controller.is_pid_sandboxed(process.pid()));

    println!("[3] Waiting for exit...");
    match controller.wait(process.pid())? {
        Some(status) => {
            println!("Exit code: {}", status.exit_code());
            println!("Signal: {:?}", status.signal());
        }
        None => println!("Exit status was not recorded"),
    }

    Ok(())
}
