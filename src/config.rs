//! Configuration inputs: the backend selector, the
//! compile-time helper binary paths, and the run directory. Mirrors the
//! compiled-in `DHCLIENT_PATH` / `DHCPCD_PATH` / `LOCALSTATEDIR` constants of
//! the original, but overlayable from a TOML file so a deployment can
//! relocate the helpers without a rebuild.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{DhcpError, DhcpResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Dhclient,
    Dhcpcd,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Dhclient => write!(f, "dhclient"),
            Backend::Dhcpcd => write!(f, "dhcpcd"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = DhcpError;

    fn from_str(s: &str) -> DhcpResult<Self> {
        match s {
            "dhclient" => Ok(Backend::Dhclient),
            "dhcpcd" => Ok(Backend::Dhcpcd),
            other => Err(DhcpError::UnknownBackend(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DhcpConfig {
    pub backend: BackendName,
    pub dhclient_path: PathBuf,
    pub dhcpcd_path: PathBuf,
    pub run_dir: PathBuf,
    pub action_script_path: PathBuf,
    pub dhclient_conf_path: PathBuf,
}

/// Deserialize helper: accepts the same lowercase tokens as [`Backend`].
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct BackendName(pub String);

impl Default for BackendName {
    fn default() -> Self {
        BackendName("dhclient".to_string())
    }
}

impl Default for DhcpConfig {
    fn default() -> Self {
        Self {
            backend: BackendName::default(),
            dhclient_path: PathBuf::from("/sbin/dhclient"),
            dhcpcd_path: PathBuf::from("/sbin/dhcpcd"),
            run_dir: PathBuf::from("/var/run"),
            action_script_path: PathBuf::from("/usr/libexec/nm-dhcp-client.action"),
            dhclient_conf_path: PathBuf::from("/etc/dhclient.conf"),
        }
    }
}

impl DhcpConfig {
    /// Load defaults overlaid with a TOML file, if present at `path`. A
    /// missing file is not an error: callers run on compiled-in defaults.
    pub fn from_file(path: impl AsRef<Path>) -> DhcpResult<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                toml::from_str(&contents).map_err(|e| DhcpError::Io {
                    path: path.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(DhcpError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Resolves the configured selector to a concrete [`Backend`], and
    /// rejects it if the corresponding binary path is empty — an empty path
    /// disables that backend rather than being treated as a valid, if odd,
    /// executable name.
    pub fn backend(&self) -> DhcpResult<Backend> {
        let backend: Backend = self.backend.0.parse()?;
        if self.binary_path(backend).as_os_str().is_empty() {
            return Err(DhcpError::UnknownBackend(self.backend.0.clone()));
        }
        Ok(backend)
    }

    /// Path for the configured backend's binary.
    pub fn binary_path(&self, backend: Backend) -> &Path {
        match backend {
            Backend::Dhclient => &self.dhclient_path,
            Backend::Dhcpcd => &self.dhcpcd_path,
        }
    }

    pub fn pid_file(&self, backend: Backend, iface: &str) -> PathBuf {
        match backend {
            Backend::Dhclient => self.run_dir.join(format!("dhclient-{iface}.pid")),
            Backend::Dhcpcd => self.run_dir.join(format!("dhcpcd-{iface}.pid")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_selects_dhclient() {
        let config = DhcpConfig::default();
        assert_eq!(config.backend().unwrap(), Backend::Dhclient);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = "bogus".parse::<Backend>().unwrap_err();
        assert!(matches!(err, DhcpError::UnknownBackend(_)));
    }

    #[test]
    fn empty_binary_path_disables_that_backend() {
        let mut config = DhcpConfig::default();
        config.dhclient_path = PathBuf::new();
        assert!(matches!(config.backend(), Err(DhcpError::UnknownBackend(_))));
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let config = DhcpConfig::from_file("/nonexistent/path/does-not-exist.toml").unwrap();
        assert_eq!(config.backend().unwrap(), Backend::Dhclient);
    }

    #[test]
    fn pid_file_path_is_backend_specific() {
        let config = DhcpConfig::default();
        assert_eq!(
            config.pid_file(Backend::Dhcpcd, "eth0"),
            PathBuf::from("/var/run/dhcpcd-eth0.pid")
        );
        assert_eq!(
            config.pid_file(Backend::Dhclient, "eth0"),
            PathBuf::from("/var/run/dhclient-eth0.pid")
        );
    }
}
