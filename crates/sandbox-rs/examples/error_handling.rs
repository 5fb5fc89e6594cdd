//! Error handling example
//!
//! Shows how each failure mode of a portal launch surfaces:
//! - launch options the portal cannot express
//! - an unusable portal
//! - refused launches and early deaths (`Ok(None)`)
//! - processes that are not ours
//!
//! ## Running this example
//!
//! ```bash
//! cargo run --example error_handling
//! ```

use sandbox_rs::{
    CommandLine, LaunchOptions, Pid, SandboxController, SandboxError, SpawnOptions,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Sandbox Error Handling Examples ===\n");

    let controller = SandboxController::builder().build()?;

    println!("[Scenario 1] Unsupported launch options\n");
    scenario_unsupported(&controller);
    println!();

    println!("[Scenario 2] Invalid configuration\n");
    scenario_invalid_config();
    println!();

    println!("[Scenario 3] Launch outcomes\n");
    scenario_launch(&controller);
    println!();

    println!("[Scenario 4] Foreign pids\n");
    scenario_foreign_pid(&controller);
    println!();

    println!("=== All scenarios completed ===");
    Ok(())
}

fn scenario_unsupported(controller: &SandboxController) {
    let options = LaunchOptions {
        wait_for_exit: true,
        ..Default::default()
    };
    match controller.launch_process(
        &CommandLine::new("/bin/true"),
        &options,
        &SpawnOptions::default(),
    ) {
        Err(SandboxError::Unsupported(option)) => {
            println!("  [✓] Rejected before reaching the bus: {}", option)
        }
        other => println!("  [?] Unexpected: {:?}", other.map(|p| p.is_some())),
    }
}

fn scenario_invalid_config() {
    match SandboxController::builder().fallback_cwd("relative/dir").build() {
        Err(SandboxError::InvalidConfig(msg)) => println!("  [✓] {}", msg),
        Err(e) => println!("  [?] Unexpected error: {}", e),
        Ok(_) => println!("  [✗] Relative fallback cwd was accepted"),
    }
}

fn scenario_launch(controller: &SandboxController) {
    let result = controller.launch_process(
        &CommandLine::new("/bin/false"),
        &LaunchOptions::default(),
        &SpawnOptions::default(),
    );
    match result {
        Ok(Some(process)) => match controller.wait(process.pid()) {
            Ok(Some(status)) => println!("  [✓] Exited with code {}", status.exit_code()),
            Ok(None) => println!("  [!] Exit status lost"),
            Err(e) => println!("  [✗] {}", e),
        },
        Ok(None) => println!("  [!] Refused by the portal, or died before it was identified"),
        Err(SandboxError::PortalUnavailable(reason)) => {
            println!("  [✗] Portal unavailable: {}", reason);
            println!("      Every later launch reports the same error");
        }
        Err(e) => println!("  [✗] {}", e),
    }
}

fn scenario_foreign_pid(controller: &SandboxController) {
    let pid = Pid::this();
    println!("  Sandboxed: {}", controller.is_pid_sandboxed(pid));
    match controller.ignore_exit_status(pid) {
        Err(SandboxError::NotRunning { pid }) => println!("  [✓] pid {} is not ours", pid),
        other => println!("  [?] Unexpected: {:?}", other),
    }
}
