//! Daemon configuration file.
//!
//! ```toml
//! listen = "0.0.0.0:4000"
//! key_file = "/var/lib/kontrol/signing.key"
//! machine_secret = "change-me"
//!
//! [kontrol]
//! heartbeat_interval = "10s"
//! heartbeat_grace = "20s"
//! update_interval = "1m"
//! record_ttl = "90s"
//! issuer = "kontrol"
//! ```
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use kontrol::KontrolConfig;
use serde::Deserialize;

pub const DEFAULT_LISTEN: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    4000,
);

#[derive(Debug, thiserror::Error)]
pub enum ServerConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid registry settings: {0}")]
    Invalid(#[from] kontrol::ConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP API listens on.
    pub listen: SocketAddr,
    /// Hex-encoded Ed25519 seed. Generated on first start if missing.
    pub key_file: Option<PathBuf>,
    /// Credential machines present to `POST /machine`. Unset closes it.
    pub machine_secret: Option<String>,
    pub kontrol: KontrolConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN,
            key_file: None,
            machine_secret: None,
            kontrol: KontrolConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn parse(text: &str) -> Result<Self, ServerConfigError> {
        let config: Self = toml::from_str(text)?;
        config.kontrol.validate()?;
        Ok(config)
    }

    /// Read and validate `path`.
    pub fn load(path: &Path) -> Result<Self, ServerConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ServerConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }
}
