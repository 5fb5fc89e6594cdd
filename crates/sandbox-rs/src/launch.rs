//! Launch inputs and their translation into a portal `Spawn` request

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::OpenOptions;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::sched::CloneFlags;
use nix::sys::resource::Resource;

use sandbox_core::{Result, SandboxError};
use sandbox_portal::protocol::bytestring;
use sandbox_portal::{SandboxFlags, SpawnFlags, SpawnRequest};

/// Program plus arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    argv: Vec<OsString>,
}

impl CommandLine {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            argv: vec![program.into()],
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.argv.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.argv[0]
    }

    pub fn argv(&self) -> &[OsString] {
        &self.argv
    }
}

/// Hook run in the child between fork and exec
#[derive(Clone)]
pub struct PreExecHook(pub Arc<dyn Fn() -> std::io::Result<()> + Send + Sync>);

impl fmt::Debug for PreExecHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PreExecHook")
    }
}

/// Generic process launch options.
///
/// Only the first group of fields can be expressed through the portal; the
/// rest are rejected by [`LaunchOptions::validate_for_portal`].
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Variables to set, or the whole environment with `clear_environment`
    pub environment: BTreeMap<String, String>,
    pub clear_environment: bool,
    pub current_directory: Option<PathBuf>,
    /// `(fd in this process, fd number in the child)`
    pub fds_to_remap: Vec<(RawFd, RawFd)>,
    pub kill_on_parent_death: bool,

    pub clone_flags: Option<CloneFlags>,
    /// Block in launch until the child exits
    pub wait_for_exit: bool,
    pub allow_new_privs: bool,
    /// Explicit executable path instead of argv[0] lookup
    pub real_path: Option<PathBuf>,
    pub pre_exec_hook: Option<PreExecHook>,
    pub maximize_rlimits: Vec<Resource>,
}

impl LaunchOptions {
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.current_directory = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn remap_fd(mut self, source: RawFd, target: RawFd) -> Self {
        self.fds_to_remap.push((source, target));
        self
    }

    /// Reject options the portal protocol has no equivalent for
    pub fn validate_for_portal(&self) -> Result<()> {
        let unsupported = if self.clone_flags.is_some() {
            Some("clone_flags")
        } else if self.wait_for_exit {
            Some("wait_for_exit")
        } else if self.allow_new_privs {
            Some("allow_new_privs")
        } else if self.real_path.is_some() {
            Some("real_path")
        } else if self.pre_exec_hook.is_some() {
            Some("pre_exec_hook")
        } else if !self.maximize_rlimits.is_empty() {
            Some("maximize_rlimits")
        } else {
            None
        };

        match unsupported {
            Some(option) => Err(SandboxError::Unsupported(option.to_string())),
            None => Ok(()),
        }
    }
}

/// Portal-specific launch options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnOptions {
    /// Paths exposed read-only inside the child's sandbox
    pub sandbox_expose_ro: Vec<PathBuf>,
    pub sandbox_flags: SandboxFlags,
}

impl SpawnOptions {
    pub fn expose_ro(mut self, path: impl AsRef<Path>) -> Self {
        self.sandbox_expose_ro.push(path.as_ref().to_path_buf());
        self
    }
}

/// Encode one launch into a `Spawn` request
pub(crate) fn build_spawn_request(
    cmdline: &CommandLine,
    options: &LaunchOptions,
    spawn_options: &SpawnOptions,
    fallback_cwd: &Path,
) -> Result<SpawnRequest> {
    let cwd = options
        .current_directory
        .as_deref()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(fallback_cwd);

    let mut flags = SpawnFlags::portal_default();
    flags.clear_env = options.clear_environment;
    flags.watch_bus = options.kill_on_parent_death;

    Ok(SpawnRequest {
        cwd: bytestring(cwd.as_os_str()),
        argv: cmdline.argv().iter().map(|arg| bytestring(arg)).collect(),
        fds: remapped_fds(&options.fds_to_remap)?,
        env: options.environment.clone(),
        flags,
        sandbox_flags: spawn_options.sandbox_flags,
        expose_ro: open_exposed(&spawn_options.sandbox_expose_ro)?,
    })
}

/// The child's stdio, overridden by explicit remaps
fn remapped_fds(remaps: &[(RawFd, RawFd)]) -> Result<BTreeMap<u32, OwnedFd>> {
    let mut fds = BTreeMap::new();
    fds.insert(0, std::io::stdin().as_fd().try_clone_to_owned()?);
    fds.insert(1, std::io::stdout().as_fd().try_clone_to_owned()?);
    fds.insert(2, std::io::stderr().as_fd().try_clone_to_owned()?);

    for &(source, target) in remaps {
        let target = u32::try_from(target).map_err(|_| {
            SandboxError::InvalidConfig(format!("Invalid target fd {}", target))
        })?;
        if source < 0 {
            return Err(SandboxError::InvalidConfig(format!(
                "Invalid source fd {}",
                source
            )));
        }
        // SAFETY: the caller keeps `source` open for the duration of the
        // launch; we only duplicate it.
        let borrowed = unsafe { BorrowedFd::borrow_raw(source) };
        fds.insert(target, borrowed.try_clone_to_owned()?);
    }

    Ok(fds)
}

fn open_exposed(paths: &[PathBuf]) -> Result<Vec<OwnedFd>> {
    paths
        .iter()
        .map(|path| {
            OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_PATH)
                .open(path)
                .map(OwnedFd::from)
                .map_err(|e| {
                    SandboxError::Io(std::io::Error::new(
                        e.kind(),
                        format!("cannot expose {}: {}", path.display(), e),
                    ))
                })
        })
        .collect()
}
