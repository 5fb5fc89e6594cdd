//! `BusConnection` over the D-Bus session bus

use std::collections::HashMap;
use std::os::fd::AsFd;
use std::thread;

use crossbeam_channel::Receiver;
use log::{debug, warn};
use zbus::blocking::{Connection, MessageIterator};
use zbus::zvariant::{Fd, OwnedValue, Value};
use zbus::{MatchRule, message};

use sandbox_core::{ExternalPid, PortalConfig, Result, SandboxError};

use crate::bus::{BusConnection, Connector};
use crate::protocol::{
    OPTION_EXPOSE_FD_RO, OPTION_SANDBOX_FLAGS, PortalInfo, PortalSignal, SPAWN_METHOD,
    SignalKind, SignalPayload, SpawnRequest,
};

const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Signals buffered per subscription before zbus starts dropping
const SIGNAL_QUEUE: usize = 256;

/// Private session bus connection to the portal
pub struct DbusConnection {
    conn: Connection,
    config: PortalConfig,
}

impl DbusConnection {
    /// Open a new, unshared session bus connection
    pub fn connect(config: PortalConfig) -> Result<Self> {
        let conn = Connection::session().map_err(bus_error)?;
        debug!(
            "Connected to session bus as {:?}",
            conn.unique_name().map(|name| name.to_string())
        );
        Ok(Self { conn, config })
    }

    pub fn connector(config: PortalConfig) -> Connector {
        Box::new(move || {
            let connection: Box<dyn BusConnection> = Box::new(Self::connect(config)?);
            Ok(connection)
        })
    }

    fn property(&self, name: &str) -> Result<u32> {
        let reply = self
            .conn
            .call_method(
                Some(self.config.bus_name.as_str()),
                self.config.object_path.as_str(),
                Some(PROPERTIES_INTERFACE),
                "Get",
                &(self.config.interface.as_str(), name),
            )
            .map_err(bus_error)?;

        let value: OwnedValue = reply.body().deserialize().map_err(bus_error)?;
        u32::try_from(value).map_err(|e| {
            SandboxError::Bus(format!("portal property {} is not a u32: {}", name, e))
        })
    }
}

impl BusConnection for DbusConnection {
    fn portal_info(&self) -> Result<PortalInfo> {
        Ok(PortalInfo {
            version: self.property("version")?,
            supports: self.property("supports")?,
        })
    }

    fn call_spawn(&self, request: &SpawnRequest) -> Result<ExternalPid> {
        let fds: HashMap<u32, Fd<'_>> = request
            .fds
            .iter()
            .map(|(target, fd)| (*target, Fd::from(fd.as_fd())))
            .collect();

        let env: HashMap<&str, &str> = request
            .env
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();

        let options = spawn_options(request);

        let reply = self
            .conn
            .call_method(
                Some(self.config.bus_name.as_str()),
                self.config.object_path.as_str(),
                Some(self.config.interface.as_str()),
                SPAWN_METHOD,
                &(
                    &request.cwd,
                    &request.argv,
                    fds,
                    env,
                    request.flag_bits(),
                    options,
                ),
            )
            .map_err(bus_error)?;

        reply.body().deserialize::<u32>().map_err(bus_error)
    }

    fn subscribe(&self) -> Result<Receiver<PortalSignal>> {
        // One rule for the whole interface: a single stream keeps SpawnStarted
        // ahead of the SpawnExited for the same process.
        let rule = MatchRule::builder()
            .msg_type(message::Type::Signal)
            .path(self.config.object_path.as_str())
            .and_then(|rule| rule.interface(self.config.interface.as_str()))
            .map_err(bus_error)?
            .build();

        let messages = MessageIterator::for_match_rule(rule, &self.conn, Some(SIGNAL_QUEUE))
            .map_err(bus_error)?;

        let (tx, rx) = crossbeam_channel::unbounded();
        thread::Builder::new()
            .name("portal-signals".to_string())
            .spawn(move || {
                for message in messages {
                    let message = match message {
                        Ok(message) => message,
                        Err(e) => {
                            warn!("Error reading portal signal: {}", e);
                            continue;
                        }
                    };

                    let header = message.header();
                    let Some(kind) = header
                        .member()
                        .and_then(|member| SignalKind::from_member(member.as_str()))
                    else {
                        continue;
                    };

                    let payload = match message.body().deserialize::<(u32, u32)>() {
                        Ok((first, second)) => SignalPayload::Pair(first, second),
                        Err(e) => SignalPayload::Malformed(e.to_string()),
                    };

                    if tx.send(PortalSignal::new(kind, payload)).is_err() {
                        break;
                    }
                }
                debug!("Portal signal subscription closed");
            })?;

        Ok(rx)
    }
}

/// The `a{sv}` options of `Spawn`. Empty entries are left out.
fn spawn_options(request: &SpawnRequest) -> HashMap<&'static str, Value<'_>> {
    let mut options = HashMap::new();
    if !request.expose_ro.is_empty() {
        let exposed: Vec<Fd<'_>> = request
            .expose_ro
            .iter()
            .map(|fd| Fd::from(fd.as_fd()))
            .collect();
        options.insert(OPTION_EXPOSE_FD_RO, Value::from(exposed));
    }
    if !request.sandbox_flags.is_empty() {
        options.insert(
            OPTION_SANDBOX_FLAGS,
            Value::from(request.sandbox_flags.to_bits()),
        );
    }
    options
}

fn bus_error(e: impl Into<zbus::Error>) -> SandboxError {
    match e.into() {
        zbus::Error::MethodError(name, detail, _) => SandboxError::Bus(format!(
            "{}: {}",
            name,
            detail.unwrap_or_default()
        )),
        other => SandboxError::Bus(other.to_string()),
    }
}
