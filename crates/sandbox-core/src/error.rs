//! Error types for portal launch operations

use std::io;
use thiserror::Error;

/// Result type for sandbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors that can occur while launching or tracking portal processes
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Syscall error: {0}")]
    Syscall(String),

    /// Transport failure or error reply from the message bus
    #[error("Bus error: {0}")]
    Bus(String),

    /// The portal cannot be used at all: too old, missing a capability,
    /// or the signal subscriptions could not be established.
    #[error("Portal unavailable: {0}")]
    PortalUnavailable(String),

    #[error("Malformed signal: {0}")]
    MalformedSignal(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Launch option with no equivalent in the portal protocol
    #[error("Unsupported launch option: {0}")]
    Unsupported(String),

    #[error("Process {pid} is not running")]
    NotRunning { pid: i32 },

    /// Blocking portal call issued from the bus worker thread itself
    #[error("Blocking portal call from the bus thread")]
    BusThread,
}
