//! Portal endpoint configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SandboxError};

/// Where the portal lives on the bus and how launches are shaped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Well-known bus name of the portal service
    pub bus_name: String,
    /// Object path of the portal
    pub object_path: String,
    /// Interface carrying `Spawn`, `SpawnStarted` and `SpawnExited`
    pub interface: String,
    /// Marker file whose existence means "inside the sandbox"
    pub marker_path: PathBuf,
    /// Working directory used when a launch doesn't name one
    pub fallback_cwd: PathBuf,
    /// Oldest portal version that can expose pids
    pub min_version: u32,
    /// Treat a full sandbox as restricted. Only honored in debug builds.
    pub force_restricted: bool,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            bus_name: "org.freedesktop.portal.Flatpak".to_string(),
            object_path: "/org/freedesktop/portal/Flatpak".to_string(),
            interface: "org.freedesktop.portal.Flatpak".to_string(),
            marker_path: PathBuf::from("/.flatpak-info"),
            fallback_cwd: PathBuf::from("/app"),
            min_version: 4,
            force_restricted: false,
        }
    }
}

impl PortalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bus_name.is_empty() || self.interface.is_empty() {
            return Err(SandboxError::InvalidConfig(
                "Portal bus name and interface cannot be empty".to_string(),
            ));
        }

        if !self.object_path.starts_with('/') {
            return Err(SandboxError::InvalidConfig(format!(
                "Portal object path must be absolute: {}",
                self.object_path
            )));
        }

        if !self.fallback_cwd.is_absolute() {
            return Err(SandboxError::InvalidConfig(format!(
                "Fallback working directory must be absolute: {}",
                self.fallback_cwd.display()
            )));
        }

        Ok(())
    }

    /// Whether the debug-only restricted override is in effect
    pub fn forces_restricted(&self) -> bool {
        cfg!(debug_assertions) && self.force_restricted
    }
}
