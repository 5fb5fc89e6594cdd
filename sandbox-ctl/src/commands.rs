use console::style;
use log::info;
use sandbox_rs::{SandboxController, SandboxLevel};

pub fn print_level(controller: &SandboxController) {
    println!("{}", controller.get_sandbox_level());
}

/// Report marker file and portal availability; returns whether launching can work
pub fn check_requirements(controller: &SandboxController) -> bool {
    info!("Checking sandbox requirements");
    println!("Checking sandbox requirements...\n");

    let config = controller.config();
    let level = controller.get_sandbox_level();

    if level.is_sandboxed() {
        println!("[✓] Sandbox marker found at {}", config.marker_path.display());
    } else {
        println!(
            "[✗] No sandbox marker at {} (launching needs a sandbox)",
            config.marker_path.display()
        );
    }

    if level == SandboxLevel::Restricted {
        println!("[!] Restricted instance: most permissions are revoked");
    }

    let portal_ok = match controller.connect() {
        Ok(()) => {
            println!(
                "[✓] Portal {} (version >= {}, exposes pids)",
                config.bus_name, config.min_version
            );
            true
        }
        Err(e) => {
            println!("[✗] Portal {} NOT usable: {}", config.bus_name, e);
            false
        }
    };

    println!("\nConfiguration:");
    println!("  Level:        {}", style(level).bold());
    println!("  Object path:  {}", config.object_path);
    println!("  Fallback cwd: {}", config.fallback_cwd.display());

    level.is_sandboxed() && portal_ok
}
