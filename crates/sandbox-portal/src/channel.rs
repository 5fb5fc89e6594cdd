//! Dedicated thread owning the portal connection
//!
//! The connection is opened on the worker thread and never leaves it. Callers
//! post typed requests and block on a one-shot reply. Signals are decoded on
//! the worker and applied to the shared [`ProcessLifecycleTracker`].

use std::mem;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Receiver, Sender, select};
use futures::channel::oneshot;
use futures::executor::block_on;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, MutexGuard};

use sandbox_core::{ExternalPid, ProcessLifecycleTracker, Result, SandboxError};

use crate::bus::{BusConnection, Connector};
use crate::protocol::{
    PortalSignal, SignalKind, SignalPayload, SpawnExited, SpawnRequest, SpawnStarted,
};

enum BusRequest {
    Spawn {
        request: SpawnRequest,
        reply: oneshot::Sender<Option<ExternalPid>>,
    },
    Shutdown,
}

enum WorkerState {
    /// Not started yet
    Idle(Connector),
    Running {
        requests: Sender<BusRequest>,
        thread: JoinHandle<()>,
    },
    /// Startup failed; every later call reports this reason
    Failed(String),
    Stopped,
}

/// Lazily started bus worker plus the caller-side handle to it
pub struct BusChannel {
    tracker: Arc<ProcessLifecycleTracker>,
    min_version: u32,
    state: Mutex<WorkerState>,
    bus_thread: OnceLock<ThreadId>,
}

impl BusChannel {
    pub fn new(
        tracker: Arc<ProcessLifecycleTracker>,
        min_version: u32,
        connector: Connector,
    ) -> Self {
        Self {
            tracker,
            min_version,
            state: Mutex::new(WorkerState::Idle(connector)),
            bus_thread: OnceLock::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock()
    }

    /// Whether the current thread is the bus worker
    pub fn is_bus_thread(&self) -> bool {
        self.bus_thread.get() == Some(&thread::current().id())
    }

    /// Start the worker if needed and report whether the portal is usable
    pub fn start(&self) -> Result<()> {
        self.requests().map(|_| ())
    }

    /// Ask the portal to spawn a process.
    ///
    /// `Ok(None)` means the portal refused or the call failed; the reason is
    /// logged. Blocks until the worker has processed the reply, so the
    /// external pid is already registered as unmapped when this returns.
    pub fn spawn(&self, request: SpawnRequest) -> Result<Option<ExternalPid>> {
        if self.is_bus_thread() {
            return Err(SandboxError::BusThread);
        }

        let requests = self.requests()?;
        let (reply, response) = oneshot::channel();
        requests
            .send(BusRequest::Spawn { request, reply })
            .map_err(|_| worker_gone())?;

        block_on(response).map_err(|_| worker_gone())
    }

    fn requests(&self) -> Result<Sender<BusRequest>> {
        let mut state = self.lock();

        if matches!(*state, WorkerState::Idle(_)) {
            let WorkerState::Idle(connector) = mem::replace(&mut *state, WorkerState::Stopped)
            else {
                return Err(worker_gone());
            };
            *state = match self.launch_worker(connector) {
                Ok(running) => running,
                Err(e) => {
                    error!("Portal launcher disabled: {}", e);
                    WorkerState::Failed(e.to_string())
                }
            };
        }

        match &*state {
            WorkerState::Running { requests, .. } => Ok(requests.clone()),
            WorkerState::Failed(reason) => Err(SandboxError::PortalUnavailable(reason.clone())),
            WorkerState::Idle(_) | WorkerState::Stopped => Err(worker_gone()),
        }
    }

    fn launch_worker(&self, connector: Connector) -> Result<WorkerState> {
        let (requests, inbox) = crossbeam_channel::unbounded();
        let (ready, startup) = oneshot::channel::<Result<()>>();
        let tracker = Arc::clone(&self.tracker);
        let min_version = self.min_version;

        let thread = thread::Builder::new()
            .name("portal-bus".to_string())
            .spawn(move || match BusWorker::connect(connector, tracker, min_version) {
                Ok(worker) => {
                    let _ = ready.send(Ok(()));
                    worker.run(inbox);
                }
                Err(e) => {
                    let _ = ready.send(Err(e));
                }
            })?;

        let _ = self.bus_thread.set(thread.thread().id());

        match block_on(startup) {
            Ok(Ok(())) => {
                info!("Portal bus thread started");
                Ok(WorkerState::Running { requests, thread })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(SandboxError::PortalUnavailable(
                    "bus thread exited during startup".to_string(),
                ))
            }
        }
    }
}

impl Drop for BusChannel {
    fn drop(&mut self) {
        let state = mem::replace(&mut *self.lock(), WorkerState::Stopped);
        if let WorkerState::Running { requests, thread } = state {
            let _ = requests.send(BusRequest::Shutdown);
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

fn worker_gone() -> SandboxError {
    SandboxError::PortalUnavailable("bus thread is not running".to_string())
}

/// State living on the bus thread
struct BusWorker {
    connection: Box<dyn BusConnection>,
    tracker: Arc<ProcessLifecycleTracker>,
    signals: Receiver<PortalSignal>,
}

impl BusWorker {
    /// Open the connection, check the portal and confirm the subscription.
    /// Any failure here disables the launcher for good.
    fn connect(
        connector: Connector,
        tracker: Arc<ProcessLifecycleTracker>,
        min_version: u32,
    ) -> Result<Self> {
        let connection = connector()?;

        let info = connection.portal_info()?;
        info.check(min_version)?;
        debug!(
            "Portal version {} supports {:#x}",
            info.version, info.supports
        );

        let signals = connection.subscribe().map_err(|e| {
            SandboxError::PortalUnavailable(format!(
                "cannot subscribe to {} and {}: {}",
                SignalKind::SpawnStarted.member(),
                SignalKind::SpawnExited.member(),
                e
            ))
        })?;

        Ok(Self {
            connection,
            tracker,
            signals,
        })
    }

    fn run(self, inbox: Receiver<BusRequest>) {
        loop {
            let keep_running = select! {
                recv(inbox) -> request => match request {
                    Ok(BusRequest::Spawn { request, reply }) => {
                        let external = self.spawn(&request);
                        let _ = reply.send(external);
                        true
                    }
                    Ok(BusRequest::Shutdown) | Err(_) => false,
                },
                recv(self.signals) -> signal => match signal {
                    Ok(signal) => {
                        self.on_signal(&signal);
                        true
                    }
                    Err(_) => {
                        error!("Portal signal subscription closed");
                        false
                    }
                },
            };

            if !keep_running {
                break;
            }
        }

        // Nothing will report exits any more
        self.tracker.shutdown();
        debug!("Portal bus thread exiting");
    }

    fn spawn(&self, request: &SpawnRequest) -> Option<ExternalPid> {
        match self.connection.call_spawn(request) {
            Ok(0) => {
                warn!("Portal Spawn returned pid 0");
                None
            }
            Ok(external) => {
                // Before returning to select!, so SpawnStarted always finds it
                self.tracker.register_unmapped(external);
                debug!("Portal spawned external pid {}", external);
                Some(external)
            }
            Err(e) => {
                error!("Portal Spawn failed: {}", e);
                None
            }
        }
    }

    fn on_signal(&self, signal: &PortalSignal) {
        match signal.kind {
            SignalKind::SpawnStarted => self.on_spawn_started(&signal.payload),
            SignalKind::SpawnExited => self.on_spawn_exited(&signal.payload),
        }
    }

    fn on_spawn_started(&self, payload: &SignalPayload) {
        match SpawnStarted::decode(payload) {
            Ok(signal) => self.tracker.on_spawn_started(signal.external, signal.relative),
            Err(e) => warn!("Dropping signal: {}", e),
        }
    }

    fn on_spawn_exited(&self, payload: &SignalPayload) {
        match SpawnExited::decode(payload) {
            Ok(signal) => self.tracker.on_spawn_exited(signal.external, signal.exit_status),
            Err(e) => warn!("Dropping signal: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{SUPPORTS_EXPOSE_PIDS, SandboxFlags, SpawnFlags};
    use crate::testing::MockPortal;
    use std::collections::BTreeMap;
    use std::sync::Weak;
    use std::time::Duration;

    fn request(program: &str) -> SpawnRequest {
        SpawnRequest {
            cwd: b"/\0".to_vec(),
            argv: vec![crate::protocol::bytestring(program.as_ref())],
            fds: BTreeMap::new(),
            env: BTreeMap::new(),
            flags: SpawnFlags::portal_default(),
            sandbox_flags: SandboxFlags::default(),
            expose_ro: Vec::new(),
        }
    }

    fn channel(portal: MockPortal) -> (Arc<ProcessLifecycleTracker>, BusChannel) {
        let tracker = Arc::new(ProcessLifecycleTracker::new());
        let channel = BusChannel::new(Arc::clone(&tracker), 4, portal.connector());
        (tracker, channel)
    }

    #[test]
    fn spawn_registers_unmapped_pid() {
        let (portal, handle) = MockPortal::new();
        handle.push_reply(Ok(100));
        let (tracker, channel) = channel(portal);

        assert_eq!(channel.spawn(request("/bin/true")).unwrap(), Some(100));

        let recorded = handle.next_spawn(Duration::from_secs(1)).unwrap();
        assert_eq!(recorded.argv, vec![b"/bin/true\0".to_vec()]);

        handle.emit_started(100, 55);
        assert_eq!(tracker.wait_for_correlation(100), Some(nix::unistd::Pid::from_raw(55)));
    }

    #[test]
    fn spawn_error_reply_yields_none() {
        let (portal, handle) = MockPortal::new();
        handle.push_reply(Err(SandboxError::Bus(
            "org.freedesktop.DBus.Error.AccessDenied: nope".to_string(),
        )));
        let (tracker, channel) = channel(portal);

        assert_eq!(channel.spawn(request("/bin/true")).unwrap(), None);
        assert_eq!(tracker.running_count(), 0);
    }

    #[test]
    fn old_portal_disables_launcher() {
        let (portal, _handle) = MockPortal::new();
        let portal = portal.with_info(3, SUPPORTS_EXPOSE_PIDS);
        let (_tracker, channel) = channel(portal);

        let err = channel.spawn(request("/bin/true")).unwrap_err();
        assert!(matches!(err, SandboxError::PortalUnavailable(_)));

        // Stays disabled
        assert!(channel.start().is_err());
    }

    #[test]
    fn missing_expose_pids_disables_launcher() {
        let (portal, _handle) = MockPortal::new();
        let (_tracker, channel) = channel(portal.with_info(5, 0));
        assert!(matches!(
            channel.start(),
            Err(SandboxError::PortalUnavailable(_))
        ));
    }

    #[test]
    fn failed_subscription_disables_launcher() {
        let (portal, _handle) = MockPortal::new();
        let (_tracker, channel) = channel(portal.fail_subscription());

        let err = channel.start().unwrap_err();
        assert!(matches!(err, SandboxError::PortalUnavailable(_)));
        assert!(err.to_string().contains("SpawnExited"));
    }

    #[test]
    fn malformed_signal_does_not_touch_state() {
        let (portal, handle) = MockPortal::new();
        handle.push_reply(Ok(100));
        let (tracker, channel) = channel(portal);
        channel.spawn(request("/bin/true")).unwrap();

        handle.emit(SignalKind::SpawnStarted, SignalPayload::Malformed("(s)".into()));
        handle.emit_started(100, 55);

        assert_eq!(tracker.wait_for_correlation(100), Some(nix::unistd::Pid::from_raw(55)));
        assert_eq!(tracker.running_count(), 1);
    }

    #[test]
    fn caller_on_bus_thread_is_refused() {
        let slot: Arc<OnceLock<Weak<BusChannel>>> = Arc::new(OnceLock::new());
        let (verdict_tx, verdict_rx) = crossbeam_channel::bounded(1);

        let (portal, handle) = MockPortal::new();
        let hook_slot = Arc::clone(&slot);
        let portal = portal.on_spawn(move |_| {
            if let Some(channel) = hook_slot.get().and_then(Weak::upgrade) {
                let refused = matches!(
                    channel.spawn(request("/bin/nested")),
                    Err(SandboxError::BusThread)
                );
                let _ = verdict_tx.send(refused);
            }
        });
        handle.push_reply(Ok(100));

        let tracker = Arc::new(ProcessLifecycleTracker::new());
        let channel = Arc::new(BusChannel::new(tracker, 4, portal.connector()));
        let _ = slot.set(Arc::downgrade(&channel));

        assert!(!channel.is_bus_thread());
        assert_eq!(channel.spawn(request("/bin/true")).unwrap(), Some(100));
        assert!(verdict_rx.recv_timeout(Duration::from_secs(1)).unwrap());
    }

    #[test]
    fn drop_joins_worker() {
        let (portal, handle) = MockPortal::new();
        let (_tracker, channel) = channel(portal);
        channel.start().unwrap();
        drop(channel);

        // The worker dropped its signal receivers on the way out
        assert!(!handle.emit_started(1, 1));
    }

    #[test]
    fn started_is_applied_before_exited() {
        let (portal, handle) = MockPortal::new();
        let emitter = handle.clone();
        let portal = portal.on_spawn(move |external| {
            if let Some(external) = external {
                emitter.emit_started(external, external - 900);
                emitter.emit_exited(external, 7 << 8);
            }
        });
        let (tracker, channel) = channel(portal);

        for external in 1000..1200 {
            handle.push_reply(Ok(external));
            assert_eq!(channel.spawn(request("/bin/true")).unwrap(), Some(external));

            let relative = nix::unistd::Pid::from_raw((external - 900) as i32);
            assert_eq!(tracker.wait_for_correlation(external), Some(relative));
            assert_eq!(tracker.wait(relative), Some(7 << 8));
        }
    }

    #[test]
    fn lost_signal_stream_releases_waiters() {
        let (portal, handle) = MockPortal::new();
        handle.push_reply(Ok(100));
        let (tracker, channel) = channel(portal);
        channel.spawn(request("/bin/true")).unwrap();
        handle.emit_started(100, 55);
        let relative = nix::unistd::Pid::from_raw(55);
        assert_eq!(tracker.wait_for_correlation(100), Some(relative));

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let waiter = {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                let _ = done_tx.send(tracker.wait(relative));
            })
        };

        drop(handle);

        assert_eq!(done_rx.recv_timeout(Duration::from_secs(2)), Ok(None));
        waiter.join().unwrap();
        assert!(tracker.is_closed());
        assert!(!tracker.is_running(relative));
        assert!(matches!(
            channel.spawn(request("/bin/true")),
            Err(SandboxError::PortalUnavailable(_))
        ));
    }
}
