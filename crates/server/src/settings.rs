//! Runtime settings.
//!
//! Every setting can come from a flag or from the environment, with the flag
//! winning. Defaults match a container layout with the UI in `./dist` and the
//! state file in `./data`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::{Args, ValueEnum};
use steward_ca::DEFAULT_DATA_PATH;

/// Port used when none (or `0`) is configured.
pub const DEFAULT_PORT: u16 = 4000;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human readable, one line per event
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Settings shared by the server and the one-shot subcommands.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// nebula-cert executable
    #[arg(long = "nebula-cert", env = "NEBULA_CERT", default_value = "nebula-cert", global = true)]
    pub nebula_cert: String,

    /// State file holding the CA, its key and the networks
    #[arg(long = "data-path", env = "DATA_PATH", default_value = DEFAULT_DATA_PATH, global = true)]
    pub data_path: PathBuf,

    /// Directory under which per-operation workspaces are created
    #[arg(long = "work-dir", env = "STEWARD_WORK_DIR", global = true)]
    pub work_dir: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(
        long = "log-format",
        env = "STEWARD_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Pretty,
        global = true
    )]
    pub log_format: LogFormat,
}

impl Settings {
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Settings of the HTTP front door.
#[derive(Debug, Clone, Args)]
pub struct ServeSettings {
    /// Listen port (0 falls back to the default)
    #[arg(long = "port", env = "PORT", default_value_t = DEFAULT_PORT, global = true)]
    pub port: u16,

    /// Listen address
    #[arg(
        long = "bind",
        env = "BIND_ADDR",
        default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        global = true
    )]
    pub bind: IpAddr,

    /// Directory with the web UI build
    #[arg(long = "dist-dir", env = "DIST_DIR", default_value = "dist", global = true)]
    pub dist_dir: PathBuf,
}

impl ServeSettings {
    pub fn listen_addr(&self) -> SocketAddr {
        let port = if self.port == 0 { DEFAULT_PORT } else { self.port };
        SocketAddr::new(self.bind, port)
    }
}

impl Default for ServeSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dist_dir: PathBuf::from("dist"),
        }
    }
}
