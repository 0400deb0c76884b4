//! Server configuration.
//!
//! Settings are read from a TOML file whose keys mirror the classic
//! `server.*` properties:
//!
//! ```toml
//! [server]
//! address = "0.0.0.0"
//! port = 8080
//! root = "~/www"
//!
//! [server.index]
//! names = "index.html index.htm"
//!
//! [server.pool]
//! min_workers = 16
//! max_workers = 64
//! queue_capacity = 10
//!
//! [mime]
//! types = "/etc/mime.types"
//! ```
//!
//! Every key is optional. [`Settings::validate`] turns the raw values into a
//! [`ServerConfig`], refusing anything the server could not start with.

use std::ffi::OsString;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::mime::{MimeError, MimeTypes};
use crate::pool::PoolConfig;
use crate::resource::Resolver;
use crate::server::Dispatcher;
use crate::template::{TemplateError, Templates};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_ROOT: &str = "~/www";
pub const DEFAULT_INDEX_NAMES: &str = "index.html index.htm";

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("cannot serve root {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Mime(#[from] MimeError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Raw settings as read from the config file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub server: ServerSettings,
    pub mime: MimeSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    pub address: String,
    /// Kept wide so out-of-range values reach validation.
    pub port: i64,
    pub root: String,
    pub index: IndexSettings,
    /// Number of accept loops sharing the listening socket.
    pub acceptors: usize,
    pub idle_timeout_secs: u64,
    /// Directory holding `error.html` and `listing.html`.
    pub templates: Option<String>,
    pub pool: PoolSettings,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::UNSPECIFIED.to_string(),
            port: i64::from(DEFAULT_PORT),
            root: DEFAULT_ROOT.to_owned(),
            index: IndexSettings::default(),
            acceptors: 1,
            idle_timeout_secs: 60,
            templates: None,
            pool: PoolSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct IndexSettings {
    /// Space-separated, probed in order.
    pub names: String,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            names: DEFAULT_INDEX_NAMES.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    pub min_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub idle_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        let pool = PoolConfig::default();
        Self {
            min_workers: pool.min_workers,
            max_workers: pool.max_workers,
            queue_capacity: pool.queue_capacity,
            idle_timeout_secs: pool.idle_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MimeSettings {
    /// Path to a `mime.types` table; the embedded table is used when unset.
    pub types: Option<String>,
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub address: Option<String>,
    pub port: Option<i64>,
    pub root: Option<String>,
}

impl Settings {
    /// Reads settings from `path`, or returns the defaults when no path is given.
    ///
    /// A file that cannot be read is logged and the defaults are used instead.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the file exists but is not valid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            debug!("no config file given, using defaults");
            return Ok(Self::default());
        };
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                error!(path = %path.display(), error = %e, "cannot read config file, using defaults");
                return Ok(Self::default());
            }
        };
        let settings = Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        debug!(path = %path.display(), "loaded config file");
        Ok(settings)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    #[must_use]
    pub fn with_overrides(mut self, overrides: &Overrides) -> Self {
        if let Some(address) = &overrides.address {
            self.server.address = address.clone();
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(root) = &overrides.root {
            self.server.root = root.clone();
        }
        self
    }

    /// Checks every value and resolves paths.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] names the first offending key;
    /// [`ConfigError::Root`] is returned if the root cannot be resolved.
    pub fn validate(&self) -> Result<ServerConfig, ConfigError> {
        let server = &self.server;

        let address: IpAddr = server.address.trim().parse().map_err(|_| {
            ConfigError::invalid(
                "server.address",
                format!("`{}` is not an IP address", server.address),
            )
        })?;

        let port = u16::try_from(server.port)
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| {
                ConfigError::invalid("server.port", format!("{} is not in 1..=65535", server.port))
            })?;

        let root = expand_home(server.root.trim());
        let root = std::fs::canonicalize(&root)
            .map_err(|source| ConfigError::Root { path: root, source })?;
        if !root.is_dir() {
            return Err(ConfigError::invalid(
                "server.root",
                format!("{} is not a directory", root.display()),
            ));
        }

        if server.acceptors == 0 {
            return Err(ConfigError::invalid("server.acceptors", "must be at least 1"));
        }
        if server.idle_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "server.idle_timeout_secs",
                "must be at least 1",
            ));
        }

        let pool = &server.pool;
        if pool.max_workers == 0 {
            return Err(ConfigError::invalid(
                "server.pool.max_workers",
                "must be at least 1",
            ));
        }
        if pool.min_workers > pool.max_workers {
            debug!(
                min_workers = pool.min_workers,
                max_workers = pool.max_workers,
                "clamping server.pool.min_workers to max_workers"
            );
        }

        Ok(ServerConfig {
            address,
            port,
            root,
            index_names: server
                .index
                .names
                .split_whitespace()
                .map(str::to_owned)
                .collect(),
            acceptors: server.acceptors,
            idle_timeout: Duration::from_secs(server.idle_timeout_secs),
            templates: server.templates.as_deref().map(expand_home),
            mime_types: self.mime.types.as_deref().map(expand_home),
            pool: PoolConfig {
                min_workers: pool.min_workers.min(pool.max_workers),
                max_workers: pool.max_workers,
                queue_capacity: pool.queue_capacity,
                idle_timeout: Duration::from_secs(pool.idle_timeout_secs),
            },
        })
    }
}

/// Validated configuration the server is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub address: IpAddr,
    pub port: u16,
    pub root: PathBuf,
    pub index_names: Vec<String>,
    pub acceptors: usize,
    /// Idle-read timeout per connection.
    pub idle_timeout: Duration,
    pub templates: Option<PathBuf>,
    pub mime_types: Option<PathBuf>,
    pub pool: PoolConfig,
}

impl ServerConfig {
    /// Defaults for everything but the root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            root: root.into(),
            index_names: DEFAULT_INDEX_NAMES
                .split_whitespace()
                .map(str::to_owned)
                .collect(),
            acceptors: 1,
            idle_timeout: Duration::from_secs(60),
            templates: None,
            mime_types: None,
            pool: PoolConfig::default(),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Builds the request dispatcher: resolver, mime table and templates.
    ///
    /// # Errors
    ///
    /// Fails if the root cannot be resolved or a configured mime table or
    /// template directory cannot be read.
    pub fn dispatcher(&self) -> Result<Dispatcher, ConfigError> {
        let resolver =
            Resolver::new(&self.root, self.index_names.clone()).map_err(|source| {
                ConfigError::Root {
                    path: self.root.clone(),
                    source,
                }
            })?;
        let mime = match &self.mime_types {
            Some(path) => MimeTypes::load(path)?,
            None => MimeTypes::embedded(),
        };
        let templates = match &self.templates {
            Some(dir) => Templates::load(dir)?,
            None => Templates::embedded(),
        };
        Ok(Dispatcher::new(resolver, mime, templates).idle_timeout(self.idle_timeout))
    }
}

/// Expands a leading `~` to `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    expand_tilde(path, std::env::var_os("HOME"))
}

fn expand_tilde(path: &str, home: Option<OsString>) -> PathBuf {
    let Some(home) = home else {
        return PathBuf::from(path);
    };
    if path == "~" {
        return PathBuf::from(home);
    }
    match path.strip_prefix("~/") {
        Some(rest) => PathBuf::from(home).join(rest),
        None => PathBuf::from(path),
    }
}
