//! sandbox-portal: process launching through the sandbox portal service
//!
//! The portal performs fork/exec on our behalf and reports two pids per
//! child: its own ("external") and the one valid in our pid namespace
//! ("relative"). This crate owns the bus side of that exchange:
//!
//! - [`bus::BusConnection`]: the narrow seam over a message bus
//! - [`dbus::DbusConnection`]: the session bus implementation
//! - [`protocol`]: `Spawn` arguments, flags and signal decoding
//! - [`channel::BusChannel`]: the worker thread that owns the connection

pub mod bus;
pub mod channel;
pub mod dbus;
pub mod protocol;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bus::{BusConnection, Connector};
pub use channel::BusChannel;
pub use dbus::DbusConnection;
pub use protocol::{
    PortalInfo, PortalSignal, SandboxFlags, SignalKind, SignalPayload, SpawnExited, SpawnFlags,
    SpawnRequest, SpawnStarted,
};
