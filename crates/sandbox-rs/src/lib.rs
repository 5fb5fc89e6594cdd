//! sandbox-rs: launch processes through the sandbox portal
//!
//! Inside a portal sandbox, processes cannot simply fork/exec into a fresh
//! sandbox. Instead they ask the portal service over the session bus, which
//! reports the child's pid on the host and, once the child has started, its
//! pid in our namespace. [`SandboxController`] hides that dance behind
//! blocking `launch_process` / `wait` calls.
//!
//! # Example
//!
//! ```ignore
//! use sandbox_rs::{CommandLine, LaunchOptions, SandboxController, SpawnOptions};
//!
//! let controller = SandboxController::builder().build()?;
//! let cmdline = CommandLine::new("/usr/bin/env").arg("true");
//! if let Some(process) =
//!     controller.launch_process(&cmdline, &LaunchOptions::default(), &SpawnOptions::default())?
//! {
//!     let status = controller.wait(process.pid())?;
//!     println!("exited: {:?}", status);
//! }
//! ```

pub mod controller;
pub mod launch;
pub mod process;

// Re-export sub-crate types for convenience
pub use sandbox_core::{
    self as core, ExitStatus, PortalConfig, Result, SandboxError, SandboxLevel,
};
pub use sandbox_portal::{self as portal, SandboxFlags};

pub use controller::{SandboxController, SandboxControllerBuilder};
pub use launch::{CommandLine, LaunchOptions, PreExecHook, SpawnOptions};
pub use process::Process;

pub use nix::unistd::Pid;
