//! sandbox-core: shared types, errors, and pid bookkeeping for sandbox-rs
//!
//! This crate provides the foundational types used by the portal launcher:
//! - Error types and Result alias
//! - Bidirectional external/relative pid map
//! - Process lifecycle tracker shared by the bus thread and callers
//! - Sandbox level detection and portal configuration

pub mod config;
pub mod error;
pub mod level;
pub mod pid_map;
pub mod status;
pub mod tracker;

pub use config::PortalConfig;
pub use error::{Result, SandboxError};
pub use level::SandboxLevel;
pub use pid_map::{ExternalPid, PidMap, PidPair};
pub use status::ExitStatus;
pub use tracker::ProcessLifecycleTracker;
