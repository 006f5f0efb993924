use std::time::Duration;

use thiserror::Error;

use crate::commands::Command;
use crate::shard::types::NodeId;

/// Errors raised by ring topology mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RingError {
    #[error("node '{0}' is already a member of the ring")]
    DuplicateNode(NodeId),
}

/// Errors produced by a single backend handle.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connecting to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: Command, timeout: Duration },

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("shard handle has been closed")]
    Closed,

    #[error("{0}")]
    Server(String),

    #[error("unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: Command, reply: String },

    #[error("failed to ping shard, got '{0}'")]
    BadPing(String),

    #[error("shard unavailable")]
    Unavailable,
}

/// Errors returned by routed operations.
///
/// A backend failure is always scoped to the shard it happened on.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("ring has no shards")]
    NoShards,

    #[error(transparent)]
    Ring(#[from] RingError),

    #[error("shard '{shard}': {source}")]
    Backend {
        shard: NodeId,
        #[source]
        source: BackendError,
    },

    #[error("operation on shard '{shard}' panicked")]
    TaskPanicked { shard: NodeId },
}

impl RouterError {
    /// The shard the failure is scoped to, if any.
    pub fn shard(&self) -> Option<&str> {
        match self {
            RouterError::Backend { shard, .. } | RouterError::TaskPanicked { shard } => {
                Some(shard)
            }
            _ => None,
        }
    }
}

/// Errors raised while building a [`RingConfig`](crate::config::RingConfig).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no backend connection descriptors given")]
    NoDescriptors,

    #[error("invalid connection descriptor '{descriptor}': {reason}")]
    InvalidDescriptor { descriptor: String, reason: &'static str },

    #[error("got {names} shard names for {descriptors} connection descriptors")]
    NameCountMismatch { names: usize, descriptors: usize },

    #[error("shard name '{0}' is used more than once")]
    DuplicateName(String),

    #[error("invalid value '{value}' for {var}")]
    InvalidEnv { var: &'static str, value: String },
}
