//! Daemon configuration
//!
//! Optional JSON file listing the virtual interfaces to create at startup.
//! Every field has a default, so `{}` is a valid configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::{Command, ControlCommand};
use crate::manager::interface_name;
use crate::tag::TagScheme;

pub const DEFAULT_CONTROL_SOCKET: &str = "/run/vnic/control.sock";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Virtual interfaces to create on one physical interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Physical interface name, e.g. `eth0`
    pub physical: String,
    /// Name prefix; the port number is appended
    pub prefix: String,
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_control_socket")]
    pub control_socket: PathBuf,

    /// Datapath poll timeout in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u16,

    #[serde(default)]
    pub scheme: TagScheme,

    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
}

fn default_control_socket() -> PathBuf {
    PathBuf::from(DEFAULT_CONTROL_SOCKET)
}

fn default_poll_timeout_ms() -> u16 {
    100
}

impl Default for Config {
    fn default() -> Self {
        Config {
            control_socket: default_control_socket(),
            poll_timeout_ms: default_poll_timeout_ms(),
            scheme: TagScheme::default(),
            interfaces: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_timeout_ms must be greater than 0".to_string(),
            ));
        }

        let max = self.scheme.max_ports();
        for iface in &self.interfaces {
            if iface.physical.is_empty() {
                return Err(ConfigError::Invalid("empty physical interface name".to_string()));
            }
            for &port in &iface.ports {
                if port >= max {
                    return Err(ConfigError::Invalid(format!(
                        "{}: port {port} out of range (0..{max})",
                        iface.physical
                    )));
                }
                interface_name(&iface.prefix, port)
                    .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Startup commands, in file order.
    pub fn commands(&self) -> Vec<ControlCommand> {
        self.interfaces
            .iter()
            .flat_map(|iface| {
                iface.ports.iter().map(move |&port| ControlCommand {
                    cmd: Command::Add,
                    physical_interface_name: iface.physical.clone(),
                    virtual_interface_name_prefix: iface.prefix.clone(),
                    port,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.control_socket, PathBuf::from("/run/vnic/control.sock"));
        assert_eq!(config.poll_timeout_ms, 100);
        assert_eq!(config.scheme, TagScheme::Broadcom);
        assert!(config.commands().is_empty());
    }

    #[test]
    fn test_commands_in_order() {
        let config = Config::from_json(
            r#"{
                "scheme": "broadcom",
                "interfaces": [
                    { "physical": "eth0", "prefix": "veth", "ports": [2, 1] },
                    { "physical": "eth1", "prefix": "lan", "ports": [0] }
                ]
            }"#,
        )
        .unwrap();

        let cmds: Vec<_> = config
            .commands()
            .into_iter()
            .map(|c| (c.physical_interface_name, c.virtual_interface_name_prefix, c.port))
            .collect();
        assert_eq!(
            cmds,
            vec![
                ("eth0".to_string(), "veth".to_string(), 2),
                ("eth0".to_string(), "veth".to_string(), 1),
                ("eth1".to_string(), "lan".to_string(), 0),
            ]
        );
    }

    #[test]
    fn test_rejects_invalid() {
        let out_of_range =
            r#"{ "interfaces": [ { "physical": "eth0", "prefix": "veth", "ports": [32] } ] }"#;
        assert!(matches!(
            Config::from_json(out_of_range),
            Err(ConfigError::Invalid(_))
        ));

        let long_name = r#"{ "interfaces": [ { "physical": "eth0", "prefix": "averyveryverylong", "ports": [1] } ] }"#;
        assert!(matches!(Config::from_json(long_name), Err(ConfigError::Invalid(_))));

        assert!(matches!(
            Config::from_json(r#"{ "poll_timeout_ms": 0 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(Config::from_json("{"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "control_socket": "/tmp/vnic.sock", "interfaces": [ {{ "physical": "eth0", "prefix": "veth", "ports": [3] }} ] }}"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.control_socket, PathBuf::from("/tmp/vnic.sock"));
        assert_eq!(config.commands().len(), 1);

        let missing = Config::load("/nonexistent/vnic.json");
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
