//! Lifecycle bookkeeping for processes spawned through the portal
//!
//! A process moves through these states:
//!
//! ```text
//! requested --spawn reply-------------> unmapped
//! unmapped  --SpawnStarted(e, r != 0)--> running   (pair in PidMap)
//! unmapped  --SpawnStarted(e, 0)-------> dead before correlation (dropped)
//! running   --SpawnExited(e, status)---> exited    (status kept unless ignored)
//! exited    --wait(r)------------------> gone
//! ```
//!
//! All state sits behind one mutex. Every transition broadcasts on one
//! condition variable and each waiter re-checks its own predicate.
//!
//! Once the bus is lost ([`ProcessLifecycleTracker::shutdown`]) no signal will
//! ever arrive again: pending and running processes are forgotten and every
//! blocked caller returns.

use std::collections::{HashMap, HashSet};

use log::{debug, error, warn};
use nix::unistd::Pid;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{Result, SandboxError};
use crate::pid_map::{ExternalPid, PidMap, PidPair};

#[derive(Debug, Default)]
struct TrackerState {
    pids: PidMap,
    /// Spawned, waiting for SpawnStarted
    unmapped: HashSet<ExternalPid>,
    /// Correlated but not yet picked up by the launching thread
    correlated: HashMap<ExternalPid, Pid>,
    exit_statuses: HashMap<Pid, u32>,
    ignored: HashSet<Pid>,
    /// Threads currently inside `wait` per relative pid
    waiters: HashMap<Pid, usize>,
    /// No more signals will be delivered
    closed: bool,
}

/// Shared between the bus worker (signal side) and caller threads (blocking side)
#[derive(Debug, Default)]
pub struct ProcessLifecycleTracker {
    state: Mutex<TrackerState>,
    changed: Condvar,
}

impl ProcessLifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock()
    }

    /// Record a spawn reply. Must precede the matching `on_spawn_started`.
    pub fn register_unmapped(&self, external: ExternalPid) {
        let mut state = self.lock();
        if state.closed {
            warn!("External pid {} registered after the bus was lost", external);
            return;
        }
        if !state.unmapped.insert(external) {
            warn!("External pid {} registered twice", external);
        }
    }

    /// Handle `SpawnStarted`. A relative pid of 0 means the process died
    /// before it could be correlated.
    ///
    /// A pair colliding with a tracked process is not recorded: the child
    /// keeps running but is orphaned, its launch reports no process and its
    /// `SpawnExited` is ignored.
    pub fn on_spawn_started(&self, external: ExternalPid, relative: u32) {
        let mut state = self.lock();

        if !state.unmapped.remove(&external) {
            warn!("SpawnStarted for unknown external pid {}", external);
            return;
        }

        if relative == 0 {
            debug!("External pid {} exited before correlation", external);
        } else {
            let relative = Pid::from_raw(relative as i32);
            if state.pids.insert(PidPair::new(external, relative)) {
                state.correlated.insert(external, relative);
                debug!("Correlated external pid {} with {}", external, relative);
            } else {
                error!(
                    "Pid pair {} -> {} collides with a tracked process; child is orphaned",
                    external, relative
                );
            }
        }

        drop(state);
        self.changed.notify_all();
    }

    /// Handle `SpawnExited`. Safe to call more than once for the same id.
    pub fn on_spawn_exited(&self, external: ExternalPid, exit_status: u32) {
        let mut state = self.lock();

        match state.pids.delete_by_external(external) {
            Some(relative) => {
                if state.ignored.remove(&relative) {
                    debug!("Discarding exit status of {}", relative);
                } else {
                    state.exit_statuses.insert(relative, exit_status);
                    debug!("Process {} exited with status {}", relative, exit_status);
                }
            }
            None if state.unmapped.remove(&external) => {
                warn!("External pid {} exited before SpawnStarted", external);
            }
            None => {
                debug!("SpawnExited for untracked external pid {}", external);
            }
        }

        drop(state);
        self.changed.notify_all();
    }

    /// Drop the exit status of a running process when it exits.
    ///
    /// Calling this for a process that is not running is a caller bug and
    /// reported as `NotRunning`.
    pub fn ignore_exit_status(&self, relative: Pid) -> Result<()> {
        let mut state = self.lock();
        if state.pids.find_external_by_relative(relative).is_none() {
            return Err(SandboxError::NotRunning {
                pid: relative.as_raw(),
            });
        }
        state.ignored.insert(relative);
        Ok(())
    }

    /// Block until `relative` is no longer running, then return its exit
    /// status. `None` when no status is recoverable (ignored, already
    /// consumed, or never known).
    ///
    /// Every thread waiting when the exit is recorded observes the same
    /// status; the last one out removes it.
    pub fn wait(&self, relative: Pid) -> Option<u32> {
        let mut state = self.lock();
        *state.waiters.entry(relative).or_insert(0) += 1;

        while !state.closed && state.pids.find_external_by_relative(relative).is_some() {
            self.changed.wait(&mut state);
        }

        let remaining = match state.waiters.get_mut(&relative) {
            Some(count) => {
                *count -= 1;
                *count
            }
            None => 0,
        };

        if remaining == 0 {
            state.waiters.remove(&relative);
            state.exit_statuses.remove(&relative)
        } else {
            state.exit_statuses.get(&relative).copied()
        }
    }

    /// Block until the SpawnStarted for `external` has been processed and
    /// return the relative pid, or `None` if the process died first.
    pub fn wait_for_correlation(&self, external: ExternalPid) -> Option<Pid> {
        let mut state = self.lock();
        while !state.closed && state.unmapped.contains(&external) {
            self.changed.wait(&mut state);
        }
        state.correlated.remove(&external)
    }

    /// The bus is gone: forget pending and running processes and release
    /// every blocked caller. Recorded exit statuses stay collectable.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;

        let lost = state.pids.len() + state.unmapped.len();
        if lost > 0 {
            warn!("Bus lost with {} processes still tracked", lost);
        }
        state.pids = PidMap::new();
        state.unmapped.clear();
        state.ignored.clear();

        drop(state);
        self.changed.notify_all();
    }

    /// Whether `shutdown` has run
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn find_external_by_relative(&self, relative: Pid) -> Option<ExternalPid> {
        self.lock().pids.find_external_by_relative(relative)
    }

    pub fn find_relative_by_external(&self, external: ExternalPid) -> Option<Pid> {
        self.lock().pids.find_relative_by_external(external)
    }

    pub fn is_running(&self, relative: Pid) -> bool {
        self.find_external_by_relative(relative).is_some()
    }

    /// Number of processes currently correlated and running
    pub fn running_count(&self) -> usize {
        self.lock().pids.len()
    }
}
