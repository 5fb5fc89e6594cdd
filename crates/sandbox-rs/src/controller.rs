//! Public entry point for launching processes through the portal

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use log::{debug, info, warn};
use nix::unistd::Pid;

use sandbox_core::{
    ExitStatus, PortalConfig, ProcessLifecycleTracker, Result, SandboxError, SandboxLevel,
};
use sandbox_portal::{BusChannel, Connector, DbusConnection};

use crate::launch::{CommandLine, LaunchOptions, SpawnOptions, build_spawn_request};
use crate::process::Process;

/// Builder pattern for controller creation
pub struct SandboxControllerBuilder {
    config: PortalConfig,
    connector: Option<Connector>,
}

impl SandboxControllerBuilder {
    pub fn new() -> Self {
        Self {
            config: PortalConfig::default(),
            connector: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: PortalConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the sandbox marker file
    pub fn marker_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.marker_path = path.as_ref().to_path_buf();
        self
    }

    /// Set the working directory used when a launch names none
    pub fn fallback_cwd(mut self, path: impl AsRef<Path>) -> Self {
        self.config.fallback_cwd = path.as_ref().to_path_buf();
        self
    }

    /// Set the oldest acceptable portal version
    pub fn min_version(mut self, version: u32) -> Self {
        self.config.min_version = version;
        self
    }

    /// Report a full sandbox as restricted (debug builds only)
    pub fn force_restricted(mut self, force: bool) -> Self {
        self.config.force_restricted = force;
        self
    }

    /// Use a custom bus connection instead of the session bus
    pub fn connector(mut self, connector: Connector) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Build controller
    pub fn build(self) -> Result<SandboxController> {
        self.config.validate()?;
        let connector = self
            .connector
            .unwrap_or_else(|| DbusConnection::connector(self.config.clone()));
        Ok(SandboxController::with_connector(self.config, connector))
    }
}

impl Default for SandboxControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Launches processes through the portal and tracks them until reaped.
///
/// Construct one per process and share it by reference. The bus worker
/// starts on first launch and stops when the controller is dropped.
pub struct SandboxController {
    config: PortalConfig,
    level: OnceLock<SandboxLevel>,
    tracker: Arc<ProcessLifecycleTracker>,
    channel: BusChannel,
}

impl SandboxController {
    /// Controller talking to the portal on the session bus
    pub fn new(config: PortalConfig) -> Result<Self> {
        SandboxControllerBuilder::new().config(config).build()
    }

    pub fn builder() -> SandboxControllerBuilder {
        SandboxControllerBuilder::new()
    }

    fn with_connector(config: PortalConfig, connector: Connector) -> Self {
        let tracker = Arc::new(ProcessLifecycleTracker::new());
        let channel = BusChannel::new(Arc::clone(&tracker), config.min_version, connector);
        Self {
            config,
            level: OnceLock::new(),
            tracker,
            channel,
        }
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    pub fn marker_path(&self) -> &PathBuf {
        &self.config.marker_path
    }

    /// Sandbox level of this process, detected once and cached
    pub fn get_sandbox_level(&self) -> SandboxLevel {
        *self.level.get_or_init(|| {
            let mut level = SandboxLevel::detect(&self.config.marker_path);
            if level == SandboxLevel::Flatpak && self.config.forces_restricted() {
                debug!("Forcing restricted sandbox level");
                level = SandboxLevel::Restricted;
            }
            info!("Sandbox level: {}", level);
            level
        })
    }

    /// Start the bus worker now instead of on first launch
    pub fn connect(&self) -> Result<()> {
        self.channel.start()
    }

    /// Launch `cmdline` through the portal.
    ///
    /// Blocks until the portal has reported the child's relative pid.
    /// `Ok(None)` means the portal refused the launch or the child died
    /// before it could be identified. Errors mean the request itself is
    /// unusable or the portal cannot be used at all.
    pub fn launch_process(
        &self,
        cmdline: &CommandLine,
        options: &LaunchOptions,
        spawn_options: &SpawnOptions,
    ) -> Result<Option<Process>> {
        options.validate_for_portal()?;
        if self.channel.is_bus_thread() {
            return Err(SandboxError::BusThread);
        }

        let request =
            build_spawn_request(cmdline, options, spawn_options, &self.config.fallback_cwd)?;

        let Some(external) = self.channel.spawn(request)? else {
            return Ok(None);
        };

        match self.tracker.wait_for_correlation(external) {
            Some(pid) => {
                debug!(
                    "Launched {:?} as {} (external {})",
                    cmdline.program(),
                    pid,
                    external
                );
                Ok(Some(Process::new(pid)))
            }
            None => {
                warn!(
                    "{:?} (external {}) exited before it could be identified",
                    cmdline.program(),
                    external
                );
                Ok(None)
            }
        }
    }

    /// Block until `pid` exits and return its status.
    ///
    /// `Ok(None)` when no status can be recovered: it was ignored, already
    /// consumed, or `pid` was never launched by this controller.
    pub fn wait(&self, pid: Pid) -> Result<Option<ExitStatus>> {
        if self.channel.is_bus_thread() {
            return Err(SandboxError::BusThread);
        }
        Ok(self.tracker.wait(pid).map(ExitStatus::from_raw))
    }

    /// Discard the exit status of a running process once it exits
    pub fn ignore_exit_status(&self, pid: Pid) -> Result<()> {
        self.tracker.ignore_exit_status(pid)
    }

    /// Whether `pid` is a running process launched through the portal
    pub fn is_pid_sandboxed(&self, pid: Pid) -> bool {
        self.tracker.is_running(pid)
    }
}
