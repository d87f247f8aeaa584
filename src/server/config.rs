//! Server configuration
//!
//! Read from `conf/moth.json` and overridable from the command line. A
//! missing config file is not an error (defaults apply); a malformed one
//! is fatal. The channel file is mandatory at startup, the bridge file
//! optional.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Server configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name, used for the studio
    pub name: String,

    /// HTTP/WebSocket port
    pub port_http: u16,

    /// Plain RSSP-TCP port (0 disables)
    pub tcp_plain: u16,

    /// TLS RSSP-TCP port (0 disables)
    pub tcp_secure: u16,

    /// TLS certificate chain (PEM)
    pub pem_public: String,

    /// TLS private key (PEM)
    pub pem_private: String,

    /// Directory holding channels.json and bridges.json
    pub dir_conf: String,

    /// Allow any origin on the HTTP surface
    pub cors_allow: bool,

    /// Maximum channels in use (publisher admission)
    pub num_pubs: usize,

    /// Maximum sessions in use (subscriber admission)
    pub num_subs: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "moth".into(),
            port_http: 8276,
            tcp_plain: 8274,
            tcp_secure: 0,
            pem_public: "cert/cert.pem".into(),
            pem_private: "cert/key.pem".into(),
            dir_conf: "conf".into(),
            cors_allow: true,
            num_pubs: 2,
            num_subs: 5,
        }
    }
}

impl ServerConfig {
    /// Load from `path`. A missing file yields the defaults; a malformed
    /// file is a config error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read(path) {
            Ok(data) => serde_json::from_slice(&data)
                .map_err(|e| Error::Config(format!("parse {}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(Error::Config(format!("read {}: {e}", path.display()))),
        }
    }

    /// Path of the mandatory channel file.
    pub fn channels_path(&self) -> PathBuf {
        Path::new(&self.dir_conf).join("channels.json")
    }

    /// Path of the optional bridge file.
    pub fn bridges_path(&self) -> PathBuf {
        Path::new(&self.dir_conf).join("bridges.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = ServerConfig::default();
        assert_eq!(c.port_http, 8276);
        assert_eq!(c.tcp_plain, 8274);
        assert_eq!(c.tcp_secure, 0);
        assert_eq!(c.num_pubs, 2);
        assert_eq!(c.num_subs, 5);
        assert!(c.cors_allow);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let c = ServerConfig::load("/no/such/moth.json").unwrap();
        assert_eq!(c.port_http, 8276);
    }

    #[test]
    fn test_partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moth.json");
        std::fs::write(&path, br#"{"port_http": 9000, "num_subs": 50}"#).unwrap();

        let c = ServerConfig::load(&path).unwrap();
        assert_eq!(c.port_http, 9000);
        assert_eq!(c.num_subs, 50);
        assert_eq!(c.tcp_plain, 8274); // untouched default
    }

    #[test]
    fn test_malformed_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moth.json");
        std::fs::write(&path, b"{").unwrap();
        assert!(matches!(ServerConfig::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_conf_paths() {
        let c = ServerConfig::default();
        assert_eq!(c.channels_path(), PathBuf::from("conf/channels.json"));
        assert_eq!(c.bridges_path(), PathBuf::from("conf/bridges.json"));
    }
}
