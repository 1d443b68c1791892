use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Written to disk by [`AuthSyncConfig::load_or_init`] when no config exists.
pub const DEFAULT_TEMPLATE: &str = r#"[sockets]
# address the manager binds its listeners on
bind_ip = "0.0.0.0"

# where workers find the manager
[sockets.manager]
ip = "127.0.0.1"
port = 5556

# port the manager publishes broadcasts on
[sockets.worker]
port = 5556

# port of the manager's control endpoint
[sockets.discord]
port = 5555

[store]
authorized_keys = "/authorized_key"
snapshot = "/authorized_key.save"

[worker]
resync_on_connect = true
reconnect_delay_ms = 1000
"#;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuthSyncConfig {
    pub sockets: SocketsConfig,
    pub store: StoreConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SocketsConfig {
    pub bind_ip: String,
    pub manager: ManagerSocket,
    pub worker: PublishSocket,
    pub discord: ControlSocket,
}

impl Default for SocketsConfig {
    fn default() -> Self {
        Self {
            bind_ip: "0.0.0.0".into(),
            manager: ManagerSocket::default(),
            worker: PublishSocket::default(),
            discord: ControlSocket::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ManagerSocket {
    pub ip: String,
    pub port: u16,
}

impl Default for ManagerSocket {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".into(),
            port: 5556,
        }
    }
}

/// Port the manager publishes broadcasts on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PublishSocket {
    pub port: u16,
}

impl Default for PublishSocket {
    fn default() -> Self {
        Self { port: 5556 }
    }
}

/// Port of the manager's control endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ControlSocket {
    pub port: u16,
}

impl Default for ControlSocket {
    fn default() -> Self {
        Self { port: 5555 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// The authorized-keys store this node serves or maintains.
    pub authorized_keys: PathBuf,
    /// The manager's copy of the last broadcast state.
    pub snapshot: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            authorized_keys: "/authorized_key".into(),
            snapshot: "/authorized_key.save".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Replace the local store with the manager's LIST after every connect.
    pub resync_on_connect: bool,
    pub reconnect_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            resync_on_connect: true,
            reconnect_delay_ms: 1000,
        }
    }
}

impl AuthSyncConfig {
    /// Reads the config at `path`, first creating it from
    /// [`DEFAULT_TEMPLATE`] if the file does not exist.
    pub fn load_or_init(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            write_template(path)?;
        }
        Self::load(path)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path:?}"))?;
        toml::from_str(&text).with_context(|| format!("could not parse config file {path:?}"))
    }

    /// Looks a value up by dotted key, e.g. `sockets.manager.port`.
    ///
    /// Keys absent from the file resolve to their default.
    pub fn lookup(&self, key: &str) -> anyhow::Result<Option<toml::Value>> {
        let mut value = toml::Value::try_from(self).context("config is not representable")?;
        for segment in key.split('.') {
            value = match value {
                toml::Value::Table(mut table) => match table.remove(segment) {
                    Some(child) => child,
                    None => return Ok(None),
                },
                _ => return Ok(None),
            };
        }
        Ok(Some(value))
    }

    /// Address the control endpoint listens on.
    pub fn control_bind_addr(&self) -> String {
        format!("{}:{}", self.sockets.bind_ip, self.sockets.discord.port)
    }

    /// Address broadcasts are published on.
    pub fn publish_bind_addr(&self) -> String {
        format!("{}:{}", self.sockets.bind_ip, self.sockets.worker.port)
    }

    /// Where a worker subscribes to broadcasts.
    pub fn broadcast_addr(&self) -> String {
        format!("{}:{}", self.sockets.manager.ip, self.sockets.manager.port)
    }

    /// Where clients and resyncing workers reach the control endpoint.
    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.sockets.manager.ip, self.sockets.discord.port)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.worker.reconnect_delay_ms)
    }
}

fn write_template(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    info!("writing default config to {path:?}");
    let tmp_path = path.with_extension("tmp");
    let mut tmp = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;
    tmp.write_all(DEFAULT_TEMPLATE.as_bytes())?;
    tmp.sync_all()?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
