//! In-memory portal for tests
//!
//! `MockPortal` is the connection handed to the bus worker; `MockHandle`
//! stays with the test to script replies, emit signals and inspect the
//! requests the worker sent.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use sandbox_core::{ExternalPid, Result, SandboxError};

use crate::bus::{BusConnection, Connector};
use crate::protocol::{
    PortalInfo, PortalSignal, SUPPORTS_EXPOSE_PIDS, SignalKind, SignalPayload, SpawnRequest,
};

type SpawnHook = Box<dyn Fn(Option<ExternalPid>) + Send>;

/// What the worker sent in one `Spawn` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSpawn {
    pub cwd: Vec<u8>,
    pub argv: Vec<Vec<u8>>,
    pub fd_targets: Vec<u32>,
    pub env: BTreeMap<String, String>,
    pub flags: u32,
    pub sandbox_flags: u32,
    pub expose_ro: usize,
}

impl From<&SpawnRequest> for RecordedSpawn {
    fn from(request: &SpawnRequest) -> Self {
        Self {
            cwd: request.cwd.clone(),
            argv: request.argv.clone(),
            fd_targets: request.fds.keys().copied().collect(),
            env: request.env.clone(),
            flags: request.flag_bits(),
            sandbox_flags: request.sandbox_flags.to_bits(),
            expose_ro: request.expose_ro.len(),
        }
    }
}

type Replies = Arc<Mutex<VecDeque<Result<ExternalPid>>>>;

pub struct MockPortal {
    info: PortalInfo,
    replies: Replies,
    signals: Mutex<Option<Receiver<PortalSignal>>>,
    failing_subscription: bool,
    spawns: Sender<RecordedSpawn>,
    on_spawn: Option<SpawnHook>,
}

/// Test side of a [`MockPortal`]. Clones share the same portal; the signal
/// stream closes once every clone is dropped.
#[derive(Clone)]
pub struct MockHandle {
    replies: Replies,
    signals: Sender<PortalSignal>,
    spawns: Receiver<RecordedSpawn>,
}

impl MockPortal {
    /// A capable portal (version 4, exposes pids) with no scripted replies
    pub fn new() -> (Self, MockHandle) {
        let replies: Replies = Arc::default();
        let (signals_tx, signals_rx) = crossbeam_channel::unbounded();
        let (spawns_tx, spawns_rx) = crossbeam_channel::unbounded();

        let portal = Self {
            info: PortalInfo {
                version: 4,
                supports: SUPPORTS_EXPOSE_PIDS,
            },
            replies: Arc::clone(&replies),
            signals: Mutex::new(Some(signals_rx)),
            failing_subscription: false,
            spawns: spawns_tx,
            on_spawn: None,
        };
        let handle = MockHandle {
            replies,
            signals: signals_tx,
            spawns: spawns_rx,
        };
        (portal, handle)
    }

    pub fn with_info(mut self, version: u32, supports: u32) -> Self {
        self.info = PortalInfo { version, supports };
        self
    }

    pub fn fail_subscription(mut self) -> Self {
        self.failing_subscription = true;
        self
    }

    /// Run `hook` on the bus thread inside every `Spawn` call, with the
    /// external pid that call is about to return (`None` for an error reply)
    pub fn on_spawn(mut self, hook: impl Fn(Option<ExternalPid>) + Send + 'static) -> Self {
        self.on_spawn = Some(Box::new(hook));
        self
    }

    pub fn connector(self) -> Connector {
        Box::new(move || {
            let connection: Box<dyn BusConnection> = Box::new(self);
            Ok(connection)
        })
    }
}

impl BusConnection for MockPortal {
    fn portal_info(&self) -> Result<PortalInfo> {
        Ok(self.info)
    }

    fn call_spawn(&self, request: &SpawnRequest) -> Result<ExternalPid> {
        let _ = self.spawns.send(RecordedSpawn::from(request));
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SandboxError::Bus("no reply scripted".to_string())));

        if let Some(hook) = &self.on_spawn {
            hook(reply.as_ref().ok().copied());
        }
        reply
    }

    fn subscribe(&self) -> Result<Receiver<PortalSignal>> {
        if self.failing_subscription {
            return Err(SandboxError::Bus("AddMatch rejected".to_string()));
        }

        self.signals
            .lock()
            .take()
            .ok_or_else(|| SandboxError::Bus("already subscribed".to_string()))
    }
}

impl MockHandle {
    /// Queue the outcome of the next `Spawn` call
    pub fn push_reply(&self, reply: Result<ExternalPid>) {
        self.replies.lock().push_back(reply);
    }

    /// Deliver a raw signal, ordered after every earlier one. False once
    /// the worker is gone.
    pub fn emit(&self, kind: SignalKind, payload: SignalPayload) -> bool {
        self.signals.send(PortalSignal::new(kind, payload)).is_ok()
    }

    pub fn emit_started(&self, external: ExternalPid, relative: u32) -> bool {
        self.emit(SignalKind::SpawnStarted, SignalPayload::Pair(external, relative))
    }

    pub fn emit_exited(&self, external: ExternalPid, exit_status: u32) -> bool {
        self.emit(SignalKind::SpawnExited, SignalPayload::Pair(external, exit_status))
    }

    /// Next `Spawn` the worker issued, waiting up to `timeout`
    pub fn next_spawn(&self, timeout: Duration) -> Option<RecordedSpawn> {
        self.spawns.recv_timeout(timeout).ok()
    }
}
