//! Service configuration
//!
//! Settings come from an optional TOML file, then the environment, then
//! command-line flags (applied by the CLI). Every section is optional.
//!
//! ```toml
//! [files]
//! passwd = "/etc/passwd"
//! group = "/etc/group"
//!
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//!
//! [watch]
//! enabled = true
//! debounce_ms = 100
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::watcher::WatchConfig;

/// Environment variable overriding the account file path
pub const PASSWORD_FILE_ENV: &str = "PWDSVC_PASSWORD_FILE_PATH";

/// Environment variable overriding the group file path
pub const GROUP_FILE_ENV: &str = "PWDSVC_GROUP_FILE_PATH";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub files: FilesConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub watch: WatchConfig,
}

/// Source file locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    /// Account file in passwd layout
    #[serde(default = "default_passwd")]
    pub passwd: PathBuf,

    /// Group file in group layout
    #[serde(default = "default_group")]
    pub group: PathBuf,
}

fn default_passwd() -> PathBuf {
    PathBuf::from("/etc/passwd")
}

fn default_group() -> PathBuf {
    PathBuf::from("/etc/group")
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            passwd: default_passwd(),
            group: default_group(),
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Config {
    /// Load configuration from `path` (if given) and apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                log::debug!("No config file given, using defaults");
                Self::default()
            }
        };
        config.apply_env();
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&config_str)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str)?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        self.apply_overrides(
            env::var_os(PASSWORD_FILE_ENV).map(PathBuf::from),
            env::var_os(GROUP_FILE_ENV).map(PathBuf::from),
        );
    }

    /// Replace source paths with the given overrides, if any
    pub fn apply_overrides(&mut self, passwd: Option<PathBuf>, group: Option<PathBuf>) {
        if let Some(passwd) = passwd {
            log::debug!("Account file overridden: {}", passwd.display());
            self.files.passwd = passwd;
        }
        if let Some(group) = group {
            log::debug!("Group file overridden: {}", group.display());
            self.files.group = group;
        }
    }
}
