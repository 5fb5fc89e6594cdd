//! The narrow seam between the launcher and a message bus implementation

use crossbeam_channel::Receiver;

use sandbox_core::{ExternalPid, Result};

use crate::protocol::{PortalInfo, PortalSignal, SpawnRequest};

/// One connection to the portal. Owned and used by the bus worker thread only.
pub trait BusConnection: Send {
    /// Read the portal's `version` and `supports` properties
    fn portal_info(&self) -> Result<PortalInfo>;

    /// Issue `Spawn` and return the external pid from the reply
    fn call_spawn(&self, request: &SpawnRequest) -> Result<ExternalPid>;

    /// Subscribe to `SpawnStarted` and `SpawnExited` on one stream that keeps
    /// bus order. `Ok` means the subscription is confirmed.
    fn subscribe(&self) -> Result<Receiver<PortalSignal>>;
}

/// Opens a connection. Runs on the bus worker thread.
pub type Connector = Box<dyn FnOnce() -> Result<Box<dyn BusConnection>> + Send>;
