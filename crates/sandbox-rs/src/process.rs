//! Handle to a process launched through the portal

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use sandbox_core::{Result, SandboxError};

/// A launched process, identified by its pid in our namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Process {
    pid: Pid,
}

impl Process {
    pub(crate) fn new(pid: Pid) -> Self {
        Self { pid }
    }

    /// Relative pid
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Send SIGKILL. The exit is still reported through `wait`.
    pub fn terminate(&self) -> Result<()> {
        kill(self.pid, Signal::SIGKILL)
            .map_err(|e| SandboxError::Syscall(format!("Failed to kill process: {}", e)))
    }
}
