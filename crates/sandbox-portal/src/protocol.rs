//! Wire contract of the portal `Spawn` method and its two signals

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::os::fd::OwnedFd;
use std::os::unix::ffi::OsStrExt;

use sandbox_core::{ExternalPid, Result, SandboxError};

pub const SPAWN_METHOD: &str = "Spawn";

/// `supports` property bit: the portal can report spawned pids
pub const SUPPORTS_EXPOSE_PIDS: u32 = 1 << 0;

/// Option keys of the `Spawn` options dictionary
pub const OPTION_EXPOSE_FD_RO: &str = "sandbox-expose-fd-ro";
pub const OPTION_SANDBOX_FLAGS: &str = "sandbox-flags";

/// Flags of the `Spawn` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpawnFlags {
    pub clear_env: bool,
    pub latest_version: bool,
    pub sandbox: bool,
    pub no_network: bool,
    /// Kill the child when our bus connection goes away
    pub watch_bus: bool,
    pub expose_pids: bool,
    pub notify_start: bool,
}

impl SpawnFlags {
    /// Flags every launch from this crate carries
    pub fn portal_default() -> Self {
        Self {
            sandbox: true,
            expose_pids: true,
            notify_start: true,
            ..Default::default()
        }
    }

    pub fn to_bits(&self) -> u32 {
        [
            (self.clear_env, 0),
            (self.latest_version, 1),
            (self.sandbox, 2),
            (self.no_network, 3),
            (self.watch_bus, 4),
            (self.expose_pids, 5),
            (self.notify_start, 6),
        ]
        .iter()
        .filter(|(set, _)| *set)
        .fold(0, |bits, &(_, bit)| bits | (1u32 << bit))
    }
}

/// What a sandboxed spawn may share with its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SandboxFlags {
    pub share_display: bool,
    pub share_sound: bool,
    pub share_gpu: bool,
    pub session_bus: bool,
    pub a11y_bus: bool,
}

impl SandboxFlags {
    pub fn to_bits(&self) -> u32 {
        [
            (self.share_display, 0),
            (self.share_sound, 1),
            (self.share_gpu, 2),
            (self.session_bus, 3),
            (self.a11y_bus, 4),
        ]
        .iter()
        .filter(|(set, _)| *set)
        .fold(0, |bits, &(_, bit)| bits | (1u32 << bit))
    }

    pub fn is_empty(&self) -> bool {
        self.to_bits() == 0
    }
}

/// Portal properties read once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortalInfo {
    pub version: u32,
    pub supports: u32,
}

impl PortalInfo {
    /// Reject portals that cannot report pids. Without them no spawn can be
    /// correlated or reaped.
    pub fn check(&self, min_version: u32) -> Result<()> {
        if self.version < min_version {
            return Err(SandboxError::PortalUnavailable(format!(
                "portal version {} is older than required {}",
                self.version, min_version
            )));
        }

        if self.supports & SUPPORTS_EXPOSE_PIDS == 0 {
            return Err(SandboxError::PortalUnavailable(
                "portal cannot expose pids".to_string(),
            ));
        }

        Ok(())
    }
}

/// Fully encoded arguments of one `Spawn` call
#[derive(Debug)]
pub struct SpawnRequest {
    /// NUL-terminated working directory
    pub cwd: Vec<u8>,
    /// NUL-terminated arguments, program first
    pub argv: Vec<Vec<u8>>,
    /// Destination fd in the child -> fd we pass
    pub fds: BTreeMap<u32, OwnedFd>,
    pub env: BTreeMap<String, String>,
    pub flags: SpawnFlags,
    pub sandbox_flags: SandboxFlags,
    /// Paths exposed read-only, passed as `O_PATH` descriptors
    pub expose_ro: Vec<OwnedFd>,
}

impl SpawnRequest {
    pub fn flag_bits(&self) -> u32 {
        self.flags.to_bits()
    }
}

/// Encode an OS string as a byte string with the trailing NUL the portal expects
pub fn bytestring(value: &OsStr) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(value.len() + 1);
    bytes.extend_from_slice(value.as_bytes());
    bytes.push(0);
    bytes
}

/// The two portal signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    SpawnStarted,
    SpawnExited,
}

impl SignalKind {
    pub fn member(&self) -> &'static str {
        match self {
            SignalKind::SpawnStarted => "SpawnStarted",
            SignalKind::SpawnExited => "SpawnExited",
        }
    }

    /// Other members of the portal interface are not ours
    pub fn from_member(member: &str) -> Option<Self> {
        match member {
            "SpawnStarted" => Some(SignalKind::SpawnStarted),
            "SpawnExited" => Some(SignalKind::SpawnExited),
            _ => None,
        }
    }
}

/// Signal body as it came off the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalPayload {
    /// A `(uu)` body
    Pair(u32, u32),
    /// Anything else, with a description of what was received
    Malformed(String),
}

/// One portal signal, in the order the bus delivered it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalSignal {
    pub kind: SignalKind,
    pub payload: SignalPayload,
}

impl PortalSignal {
    pub fn new(kind: SignalKind, payload: SignalPayload) -> Self {
        Self { kind, payload }
    }
}

/// Decoded `SpawnStarted`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnStarted {
    pub external: ExternalPid,
    /// 0 when the process died before it could be correlated
    pub relative: u32,
}

impl SpawnStarted {
    pub fn decode(payload: &SignalPayload) -> Result<Self> {
        let (external, relative) = decode_pair(SignalKind::SpawnStarted, payload)?;
        if relative > i32::MAX as u32 {
            return Err(SandboxError::MalformedSignal(format!(
                "SpawnStarted relative pid {} out of range",
                relative
            )));
        }
        Ok(Self { external, relative })
    }
}

/// Decoded `SpawnExited`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnExited {
    pub external: ExternalPid,
    pub exit_status: u32,
}

impl SpawnExited {
    pub fn decode(payload: &SignalPayload) -> Result<Self> {
        let (external, exit_status) = decode_pair(SignalKind::SpawnExited, payload)?;
        Ok(Self {
            external,
            exit_status,
        })
    }
}

fn decode_pair(kind: SignalKind, payload: &SignalPayload) -> Result<(u32, u32)> {
    match payload {
        SignalPayload::Pair(0, _) => Err(SandboxError::MalformedSignal(format!(
            "{} with external pid 0",
            kind.member()
        ))),
        SignalPayload::Pair(a, b) => Ok((*a, *b)),
        SignalPayload::Malformed(what) => Err(SandboxError::MalformedSignal(format!(
            "{}: {}",
            kind.member(),
            what
        ))),
    }
}
