//! End-to-end launch scenarios against an in-memory portal
//!
//! Each test plays the portal from the test thread: it answers `Spawn` via
//! scripted replies and emits `SpawnStarted` / `SpawnExited` while a launcher
//! thread is blocked inside the controller.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sandbox_rs::portal::SignalKind;
use sandbox_rs::portal::testing::{MockHandle, MockPortal};
use sandbox_rs::{
    CommandLine, LaunchOptions, Pid, Process, SandboxController, SandboxError, SandboxFlags,
    SpawnOptions,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn controller() -> (Arc<SandboxController>, MockHandle) {
    let (portal, handle) = MockPortal::new();
    let controller = SandboxController::builder()
        .connector(portal.connector())
        .build()
        .unwrap();
    (Arc::new(controller), handle)
}

fn launch_in_background(
    controller: &Arc<SandboxController>,
    cmdline: CommandLine,
) -> thread::JoinHandle<sandbox_rs::Result<Option<Process>>> {
    let controller = Arc::clone(controller);
    thread::spawn(move || {
        controller.launch_process(&cmdline, &LaunchOptions::default(), &SpawnOptions::default())
    })
}

fn pid(raw: i32) -> Pid {
    Pid::from_raw(raw)
}

#[test]
fn normal_launch_wait_cycle() {
    let (controller, handle) = controller();
    handle.push_reply(Ok(100));

    let launcher = launch_in_background(&controller, CommandLine::new("/bin/echo").arg("hi"));
    handle.next_spawn(TIMEOUT).expect("Spawn was never called");
    handle.emit_started(100, 55);

    let process = launcher.join().unwrap().unwrap().expect("no process");
    assert_eq!(process.pid(), pid(55));
    assert!(controller.is_pid_sandboxed(pid(55)));

    handle.emit_exited(100, 7);
    let status = controller.wait(pid(55)).unwrap().expect("no status");
    assert_eq!(status.raw(), 7);
    assert!(!controller.is_pid_sandboxed(pid(55)));
}

#[test]
fn early_death_yields_no_process() {
    let (controller, handle) = controller();
    handle.push_reply(Ok(100));

    let launcher = launch_in_background(&controller, CommandLine::new("/bin/false"));
    handle.next_spawn(TIMEOUT).unwrap();
    handle.emit_started(100, 0);

    assert!(launcher.join().unwrap().unwrap().is_none());
    assert!(!controller.is_pid_sandboxed(pid(100)));
    assert!(!controller.is_pid_sandboxed(pid(0)));
}

#[test]
fn spawn_error_yields_no_process() {
    let (controller, handle) = controller();
    handle.push_reply(Err(SandboxError::Bus(
        "org.freedesktop.portal.Error.NotAllowed: denied".to_string(),
    )));

    let result = controller.launch_process(
        &CommandLine::new("/bin/true"),
        &LaunchOptions::default(),
        &SpawnOptions::default(),
    );
    assert!(result.unwrap().is_none());
}

#[test]
fn spawn_request_carries_launch_options() {
    let (controller, handle) = controller();
    handle.push_reply(Ok(100));

    let tmp = tempfile::tempdir().unwrap();
    let cmdline = CommandLine::new("/usr/bin/env");
    let options = LaunchOptions {
        clear_environment: true,
        kill_on_parent_death: true,
        ..Default::default()
    }
    .env("LANG", "C")
    .current_dir("/var/tmp");
    let spawn_options = SpawnOptions {
        sandbox_flags: SandboxFlags {
            share_display: true,
            ..Default::default()
        },
        ..Default::default()
    }
    .expose_ro(tmp.path());

    let launcher = {
        let controller = Arc::clone(&controller);
        thread::spawn(move || controller.launch_process(&cmdline, &options, &spawn_options))
    };

    let recorded = handle.next_spawn(TIMEOUT).unwrap();
    assert_eq!(recorded.cwd, b"/var/tmp\0".to_vec());
    assert_eq!(recorded.argv, vec![b"/usr/bin/env\0".to_vec()]);
    assert_eq!(recorded.fd_targets, vec![0, 1, 2]);
    assert_eq!(recorded.env.get("LANG").map(String::as_str), Some("C"));
    // sandbox | expose-pids | notify-start | clear-env | watch-bus
    assert_eq!(recorded.flags, (1 << 2) | (1 << 5) | (1 << 6) | 1 | (1 << 4));
    assert_eq!(recorded.sandbox_flags, 1);
    assert_eq!(recorded.expose_ro, 1);

    handle.emit_started(100, 55);
    assert!(launcher.join().unwrap().unwrap().is_some());
}

#[test]
fn concurrent_waiters_share_exit_status() {
    let (controller, handle) = controller();
    handle.push_reply(Ok(100));

    let launcher = launch_in_background(&controller, CommandLine::new("/bin/sleep").arg("1"));
    handle.next_spawn(TIMEOUT).unwrap();
    handle.emit_started(100, 55);
    launcher.join().unwrap().unwrap().unwrap();

    let waiters: Vec<_> = (0..2)
        .map(|_| {
            let controller = Arc::clone(&controller);
            thread::spawn(move || controller.wait(pid(55)))
        })
        .collect();

    // Let both waiters block before the exit arrives
    thread::sleep(Duration::from_millis(100));
    handle.emit_exited(100, 7);

    for waiter in waiters {
        let status = waiter.join().unwrap().unwrap().expect("no status");
        assert_eq!(status.raw(), 7);
    }
}

#[test]
fn ignored_exit_status_is_not_recoverable() {
    let (controller, handle) = controller();
    handle.push_reply(Ok(100));

    let launcher = launch_in_background(&controller, CommandLine::new("/bin/true"));
    handle.next_spawn(TIMEOUT).unwrap();
    handle.emit_started(100, 55);
    let process = launcher.join().unwrap().unwrap().unwrap();

    controller.ignore_exit_status(process.pid()).unwrap();
    handle.emit_exited(100, 7);

    assert_eq!(controller.wait(process.pid()).unwrap(), None);
    assert!(matches!(
        controller.ignore_exit_status(process.pid()),
        Err(SandboxError::NotRunning { pid: 55 })
    ));
}

#[test]
fn malformed_signals_are_dropped() {
    let (controller, handle) = controller();
    handle.push_reply(Ok(100));

    let launcher = launch_in_background(&controller, CommandLine::new("/bin/true"));
    handle.next_spawn(TIMEOUT).unwrap();
    handle.emit(
        SignalKind::SpawnStarted,
        sandbox_rs::portal::SignalPayload::Malformed("signature (s)".to_string()),
    );
    handle.emit_started(0, 55);
    handle.emit_started(100, 56);

    let process = launcher.join().unwrap().unwrap().unwrap();
    assert_eq!(process.pid(), pid(56));
    assert!(!controller.is_pid_sandboxed(pid(55)));
}

#[test]
fn old_portal_fails_every_launch() {
    let (portal, _handle) = MockPortal::new();
    let controller = SandboxController::builder()
        .connector(portal.with_info(3, 1).connector())
        .build()
        .unwrap();

    for _ in 0..2 {
        let result = controller.launch_process(
            &CommandLine::new("/bin/true"),
            &LaunchOptions::default(),
            &SpawnOptions::default(),
        );
        assert!(matches!(result, Err(SandboxError::PortalUnavailable(_))));
    }
}

#[test]
fn independent_launches_are_correlated_separately() {
    let (controller, handle) = controller();
    handle.push_reply(Ok(100));
    handle.push_reply(Ok(101));

    let first = launch_in_background(&controller, CommandLine::new("/bin/a"));
    handle.next_spawn(TIMEOUT).unwrap();
    let second = launch_in_background(&controller, CommandLine::new("/bin/b"));
    handle.next_spawn(TIMEOUT).unwrap();

    // Started signals arrive out of launch order
    handle.emit_started(101, 61);
    handle.emit_started(100, 60);

    assert_eq!(first.join().unwrap().unwrap().unwrap().pid(), pid(60));
    assert_eq!(second.join().unwrap().unwrap().unwrap().pid(), pid(61));

    handle.emit_exited(101, 0);
    handle.emit_exited(100, 1 << 8);
    assert!(controller.wait(pid(61)).unwrap().unwrap().success());
    assert_eq!(controller.wait(pid(60)).unwrap().unwrap().code(), Some(1));
}

#[test]
fn short_lived_processes_are_reported_in_bus_order() {
    let (portal, handle) = MockPortal::new();
    let emitter = handle.clone();
    // Both signals are queued before the Spawn reply is processed
    let portal = portal.on_spawn(move |external| {
        if let Some(external) = external {
            emitter.emit_started(external, external - 900);
            emitter.emit_exited(external, 7 << 8);
        }
    });
    let controller = SandboxController::builder()
        .connector(portal.connector())
        .build()
        .unwrap();

    for external in 1000..1200 {
        handle.push_reply(Ok(external));
        let process = controller
            .launch_process(
                &CommandLine::new("/bin/true"),
                &LaunchOptions::default(),
                &SpawnOptions::default(),
            )
            .unwrap()
            .expect("process that ran was reported as failed");

        assert_eq!(process.pid(), pid((external - 900) as i32));
        let status = controller.wait(process.pid()).unwrap().unwrap();
        assert_eq!(status.code(), Some(7));
    }
}

#[test]
fn bus_loss_releases_waiters() {
    let (controller, handle) = controller();
    handle.push_reply(Ok(100));

    let launcher = launch_in_background(&controller, CommandLine::new("/bin/sleep").arg("60"));
    handle.next_spawn(TIMEOUT).unwrap();
    handle.emit_started(100, 55);
    let process = launcher.join().unwrap().unwrap().unwrap();

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let waiter = {
        let controller = Arc::clone(&controller);
        thread::spawn(move || {
            let _ = done_tx.send(controller.wait(process.pid()).unwrap());
        })
    };

    drop(handle);

    assert_eq!(done_rx.recv_timeout(Duration::from_secs(2)), Ok(None));
    waiter.join().unwrap();
    assert!(!controller.is_pid_sandboxed(process.pid()));
}
