//! Detection of the sandbox the current process runs in
//!
//! The portal sandbox drops a marker file at a fixed path. Its presence means
//! we run inside the sandbox; an `[Instance]` section with `sandbox=true`
//! means we are a nested instance with most permissions revoked.

use std::fmt;
use std::io;
use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Degree of confinement of the current process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxLevel {
    /// Not sandboxed
    None,
    /// Full portal sandbox
    Flatpak,
    /// Nested sandbox, most permissions revoked
    Restricted,
}

impl SandboxLevel {
    /// Detect the level from the marker file at `marker`
    pub fn detect(marker: &Path) -> Self {
        match std::fs::read_to_string(marker) {
            Ok(content) => {
                if is_restricted_instance(&content) {
                    SandboxLevel::Restricted
                } else {
                    SandboxLevel::Flatpak
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No sandbox marker at {}", marker.display());
                SandboxLevel::None
            }
            Err(e) => {
                // The file exists, so we are sandboxed; we just can't tell how deep.
                warn!("Failed to read {}: {}", marker.display(), e);
                SandboxLevel::Flatpak
            }
        }
    }

    pub fn is_sandboxed(&self) -> bool {
        !matches!(self, SandboxLevel::None)
    }
}

impl fmt::Display for SandboxLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SandboxLevel::None => "none",
            SandboxLevel::Flatpak => "flatpak",
            SandboxLevel::Restricted => "restricted",
        };
        f.write_str(name)
    }
}

/// Scan INI-style text for `sandbox=true` inside the `[Instance]` section
fn is_restricted_instance(content: &str) -> bool {
    let mut in_instance = false;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            in_instance = line == "[Instance]";
            continue;
        }

        if in_instance
            && let Some((key, value)) = line.split_once('=')
            && key.trim() == "sandbox"
            && value.trim() == "true"
        {
            return true;
        }
    }

    false
}
