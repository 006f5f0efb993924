//! Ring topology configuration.
//!
//! A ring is described by a `;`-separated list of backend connection
//! descriptors. Each descriptor becomes one shard, named `shard1`, `shard2`,
//! ... by its position in the list unless an explicit name list of the same
//! length is given. Blank entries are skipped but still count as a position,
//! so `a;;b` names `b` as `shard3`.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::shard::types::NodeId;

pub const LIST_DELIMITER: char = ';';
pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

pub const ENV_CONNECTIONS: &str = "RING_CONNECTIONS";
pub const ENV_SHARD_NAMES: &str = "RING_SHARD_NAMES";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "RING_CONNECT_TIMEOUT_MS";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "RING_REQUEST_TIMEOUT_MS";
pub const ENV_IO_TIMEOUT_MS: &str = "RING_IO_TIMEOUT_MS";

/// Name given to the shard at 0-based position `index`.
pub fn default_shard_name(index: usize) -> NodeId {
    format!("shard{}", index + 1)
}

/// Splits a delimited list into `(position, entry)` pairs, dropping blank
/// entries. Positions count the blank entries too.
pub fn split_list(list: &str) -> Vec<(usize, &str)> {
    list.split(LIST_DELIMITER)
        .map(str::trim)
        .enumerate()
        .filter(|(_, s)| !s.is_empty())
        .collect()
}

/// Where and how to reach one backend.
///
/// Accepts `host`, `host:port`, `[v6addr]:port` and
/// `redis://[[user]:password@]host[:port][/db]`.
#[derive(Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: Option<u32>,
}

impl Descriptor {
    /// Socket address suitable for `TcpStream::connect`.
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

// keep credentials out of logs
impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "redis://{}", self.addr())?;
        if let Some(db) = self.db {
            write!(f, "/{db}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("db", &self.db)
            .finish()
    }
}

impl FromStr for Descriptor {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ConfigError::InvalidDescriptor { descriptor: raw.to_owned(), reason };

        let raw_trimmed = raw.trim();
        if raw_trimmed.is_empty() {
            return Err(invalid("empty descriptor"));
        }

        let rest = if let Some(rest) = raw_trimmed.strip_prefix("redis://") {
            rest
        } else if raw_trimmed.starts_with("rediss://") {
            return Err(invalid("TLS connections are not supported"));
        } else if raw_trimmed.contains("://") {
            return Err(invalid("unsupported scheme"));
        } else {
            raw_trimmed
        };

        let (userinfo, location) = match rest.rsplit_once('@') {
            Some((userinfo, location)) => (Some(userinfo), location),
            None => (None, rest),
        };

        let (hostport, db) = match location.split_once('/') {
            Some((hostport, "")) => (hostport, None),
            Some((hostport, db)) => {
                (hostport, Some(db.parse::<u32>().map_err(|_| invalid("invalid database index"))?))
            }
            None => (location, None),
        };

        let (host, port) = if let Some(bracketed) = hostport.strip_prefix('[') {
            let (host, after) =
                bracketed.split_once(']').ok_or_else(|| invalid("unterminated IPv6 address"))?;
            match after {
                "" => (host, None),
                _ => {
                    let port = after.strip_prefix(':').ok_or_else(|| invalid("invalid port"))?;
                    (host, Some(port))
                }
            }
        } else {
            match hostport.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (hostport, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| invalid("invalid port"))?,
            None => DEFAULT_PORT,
        };

        let (username, password) = match userinfo {
            None => (None, None),
            Some(info) => match info.split_once(':') {
                Some((user, pass)) => (
                    (!user.is_empty()).then(|| user.to_owned()),
                    (!pass.is_empty()).then(|| pass.to_owned()),
                ),
                None => ((!info.is_empty()).then(|| info.to_owned()), None),
            },
        };

        Ok(Descriptor { host: host.to_owned(), port, username, password, db })
    }
}

/// One shard of the ring: its name and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSpec {
    pub name: NodeId,
    pub descriptor: Descriptor,
}

#[derive(Debug, Clone)]
pub struct RingConfig {
    pub shards: Vec<ShardSpec>,
    pub connect_timeout: Duration,
    /// Bound on each backend round trip, probes and broadcasts included.
    pub io_timeout: Duration,
    /// Timeout applied to keyed operations that do not carry their own.
    pub request_timeout: Option<Duration>,
}

impl RingConfig {
    /// Parses a connection list and an optional list of shard names.
    pub fn parse(connections: &str, names: Option<&str>) -> Result<Self, ConfigError> {
        let descriptors = split_list(connections);
        if descriptors.is_empty() {
            return Err(ConfigError::NoDescriptors);
        }

        let names: Vec<NodeId> = match names.map(split_list) {
            Some(names) if !names.is_empty() => {
                if names.len() != descriptors.len() {
                    return Err(ConfigError::NameCountMismatch {
                        names: names.len(),
                        descriptors: descriptors.len(),
                    });
                }
                names.into_iter().map(|(_, name)| name.to_owned()).collect()
            }
            _ => descriptors.iter().map(|&(position, _)| default_shard_name(position)).collect(),
        };

        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateName(name.clone()));
            }
        }

        let shards = names
            .into_iter()
            .zip(descriptors)
            .map(|(name, (_, raw))| raw.parse().map(|descriptor| ShardSpec { name, descriptor }))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            shards,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
            request_timeout: None,
        })
    }

    /// Reads the configuration from `RING_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`RingConfig::from_env`], with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let connections = lookup(ENV_CONNECTIONS).ok_or(ConfigError::NoDescriptors)?;
        let names = lookup(ENV_SHARD_NAMES);
        let mut config = Self::parse(&connections, names.as_deref())?;

        if let Some(timeout) = millis(&lookup, ENV_CONNECT_TIMEOUT_MS)? {
            config.connect_timeout = timeout;
        }
        if let Some(timeout) = millis(&lookup, ENV_IO_TIMEOUT_MS)? {
            config.io_timeout = timeout;
        }
        config.request_timeout = millis(&lookup, ENV_REQUEST_TIMEOUT_MS)?;
        Ok(config)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Shard names in configuration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.shards.iter().map(|shard| shard.name.as_str())
    }
}

fn millis<F>(lookup: &F, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
    }
}
