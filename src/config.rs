//! TOML configuration for speedbeacon.
//!
//! Layered model: an explicit path wins, then the `SPEEDBEACON_CONFIG`
//! environment variable, then `/etc/speedbeacon/speedbeacon.toml`, then the
//! compiled-in defaults.  Every section and field falls back to its default
//! when omitted.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "SPEEDBEACON_CONFIG";

/// Standard system location for the config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/speedbeacon/speedbeacon.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration shared by the client and the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeaconConfig {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BeaconConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the configuration for this process.
    ///
    /// An explicit path must load; the environment and system locations are
    /// best-effort and fall through to defaults with a warning.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => Ok(Self::load_or_default()),
        }
    }

    /// Try, in order: `$SPEEDBEACON_CONFIG`, the system path, defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "SPEEDBEACON_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Offer broadcast settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Well-known UDP port offers are sent to and clients listen on.
    pub port: u16,
    /// Destination address for offers.
    pub broadcast_address: IpAddr,
    /// Milliseconds between offers.
    pub interval_ms: u64,
}

impl DiscoveryConfig {
    pub fn broadcast_target(&self) -> SocketAddr {
        SocketAddr::new(self.broadcast_address, self.port)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: 13117,
            broadcast_address: IpAddr::V4(Ipv4Addr::BROADCAST),
            interval_ms: 1000,
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Reflector (server) listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface address the transfer sockets bind to.
    pub bind_address: IpAddr,
    /// TCP transfer port; `0` lets the OS pick.
    pub tcp_port: u16,
    /// UDP transfer port; `0` lets the OS pick.
    pub udp_port: u16,
    /// Size of each filler write on TCP transfers.
    pub write_chunk_bytes: usize,
}

impl ServerConfig {
    pub fn tcp_bind(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.tcp_port)
    }

    pub fn udp_bind(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.udp_port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tcp_port: 0,
            udp_port: 0,
            write_chunk_bytes: 64 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Measurement client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// A UDP transfer is considered finished after this much silence.
    pub udp_idle_timeout_ms: u64,
    /// Requested SO_RCVBUF for UDP session sockets (the kernel may clamp it).
    pub udp_recv_buffer_bytes: usize,
    /// Read buffer size for TCP sessions.
    pub tcp_read_chunk_bytes: usize,
    /// Upper bound on TCP + UDP sessions in one run.
    pub max_sessions: u32,
}

impl ClientConfig {
    pub fn udp_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.udp_idle_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            udp_idle_timeout_ms: 1000,
            udp_recv_buffer_bytes: 4 * 1024 * 1024,
            tcp_read_chunk_bytes: 64 * 1024,
            max_sessions: 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
