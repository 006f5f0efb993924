use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use fractonring_core::config::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_IO_TIMEOUT, ENV_CONNECT_TIMEOUT_MS, ENV_CONNECTIONS,
    ENV_IO_TIMEOUT_MS, ENV_REQUEST_TIMEOUT_MS, ENV_SHARD_NAMES,
};
use fractonring_core::{ConfigError, RingConfig, RingError, RouterError};
use thiserror::Error;

/// Route keys across Redis-compatible shards with rendezvous hashing.
#[derive(Parser, Debug)]
#[command(name = "fractonring", version, about)]
pub struct Cli {
    /// Backend connection descriptors separated by ';'.
    #[arg(short, long, env = ENV_CONNECTIONS)]
    pub connections: String,

    /// Shard names separated by ';' (defaults to shard1, shard2, ...).
    #[arg(short, long, env = ENV_SHARD_NAMES)]
    pub names: Option<String>,

    /// Connect timeout per shard, in milliseconds.
    #[arg(long, env = ENV_CONNECT_TIMEOUT_MS, default_value_t = DEFAULT_CONNECT_TIMEOUT.as_millis() as u64)]
    pub connect_timeout_ms: u64,

    /// Bound on each round trip to a shard, in milliseconds.
    #[arg(long, env = ENV_IO_TIMEOUT_MS, default_value_t = DEFAULT_IO_TIMEOUT.as_millis() as u64)]
    pub io_timeout_ms: u64,

    /// Timeout for get/set, in milliseconds. A timed-out write may still land.
    #[arg(short, long, env = ENV_REQUEST_TIMEOUT_MS)]
    pub timeout_ms: Option<u64>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Show which shard owns each key. Does not connect.
    Locate {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Show how a sample of keys spreads over the shards. Does not connect.
    Distribution {
        #[arg(long, default_value_t = 100_000)]
        keys: usize,
        #[arg(long, default_value = "key-")]
        prefix: String,
    },
    /// Read a key from its shard.
    Get { key: String },
    /// Write a key to its shard.
    Set {
        key: String,
        value: String,
        /// Expiry in seconds.
        #[arg(long, default_value_t = 60)]
        ex: u64,
    },
    /// Delete every key on every shard.
    Flush {
        /// Confirm the flush.
        #[arg(long)]
        yes: bool,
    },
    /// Ping every shard.
    Health,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ring(#[from] RingError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("refusing to flush without --yes")]
    FlushNotConfirmed,
}

impl Cli {
    pub fn ring_config(&self) -> Result<RingConfig, ConfigError> {
        Ok(RingConfig::parse(&self.connections, self.names.as_deref())?
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_io_timeout(Duration::from_millis(self.io_timeout_ms))
            .with_request_timeout(self.timeout_ms.map(Duration::from_millis)))
    }
}
