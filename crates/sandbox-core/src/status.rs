//! Exit status reported by the portal

use std::fmt;

/// Raw wait status word from a `SpawnExited` signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitStatus(u32);

impl ExitStatus {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    /// Exit code if the process exited normally
    pub fn code(&self) -> Option<i32> {
        let status = self.0 as libc::c_int;
        if libc::WIFEXITED(status) {
            Some(libc::WEXITSTATUS(status))
        } else {
            None
        }
    }

    /// Terminating signal if the process was killed
    pub fn signal(&self) -> Option<i32> {
        let status = self.0 as libc::c_int;
        if libc::WIFSIGNALED(status) {
            Some(libc::WTERMSIG(status))
        } else {
            None
        }
    }

    pub fn success(&self) -> bool {
        self.code() == Some(0)
    }

    /// Shell-style exit code: the exit code, or 128 + signal
    pub fn exit_code(&self) -> i32 {
        match (self.code(), self.signal()) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => 1,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code(), self.signal()) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "killed by signal {}", signal),
            (None, None) => write!(f, "wait status {:#x}", self.0),
        }
    }
}
