use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::terminal::TerminalDefaults;

// =============================================================================
// Layered config: defaults → web-terminal.toml → WEBTERM_* env vars
// =============================================================================
//
//   web-terminal.toml:  [terminal]
//                       shell = "zsh"
//
//   env var:            WEBTERM_TERMINAL__SHELL=zsh   (double underscore = nesting)

pub const DEFAULT_CONFIG_FILE: &str = "web-terminal.toml";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub terminal: TerminalFileConfig,
    #[serde(default)]
    pub socket: SocketFileConfig,
}

/// Listener settings (`[server]`)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Defaults for spawned terminals (`[terminal]`)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TerminalFileConfig {
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Working directory of terminals created without `cwd`
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    #[serde(default = "default_term_name")]
    pub term_name: String,
    #[serde(default = "default_cols")]
    pub default_cols: u16,
    #[serde(default = "default_rows")]
    pub default_rows: u16,
}

impl Default for TerminalFileConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            workspace_root: default_workspace_root(),
            term_name: default_term_name(),
            default_cols: default_cols(),
            default_rows: default_rows(),
        }
    }
}

/// Connection liveness (`[socket]`)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SocketFileConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

impl Default for SocketFileConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8282
}
fn default_shell() -> String {
    "bash".to_string()
}
fn default_workspace_root() -> PathBuf {
    PathBuf::from("/home")
}
fn default_term_name() -> String {
    "xterm-color".to_string()
}
fn default_cols() -> u16 {
    80
}
fn default_rows() -> u16 {
    24
}
fn default_heartbeat_interval_ms() -> u64 {
    15_000
}

/// Build a figment that layers: defaults → config file → WEBTERM_* env vars.
///
/// A missing config file is skipped.
pub fn load_config(config_path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("WEBTERM_").split("__"))
}

impl ServerFileConfig {
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        use anyhow::Context;
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }
}

impl SocketFileConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }
}

impl From<&TerminalFileConfig> for TerminalDefaults {
    fn from(fc: &TerminalFileConfig) -> Self {
        Self {
            shell: fc.shell.clone(),
            workspace_root: fc.workspace_root.clone(),
            term_name: fc.term_name.clone(),
            cols: fc.default_cols,
            rows: fc.default_rows,
        }
    }
}
