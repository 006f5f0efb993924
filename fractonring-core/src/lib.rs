//! Rendezvous-hashed sharding over key-value backends.
//!
//! [`RendezvousRing`] maps keys to shard names; [`ShardRouter`] owns one
//! [`Backend`] handle per shard and dispatches keyed operations to whichever
//! shard the ring picks.

pub mod backend;
pub mod commands;
pub mod config;
pub mod errors;
pub mod shard;

pub use backend::{Backend, MemoryBackend, RespBackend};
pub use config::{Descriptor, RingConfig, ShardSpec};
pub use errors::{BackendError, ConfigError, RingError, RouterError};
pub use shard::{NodeId, RendezvousRing, Reply, RequestOptions, ShardResults, ShardRouter, TimeoutPolicy};
pub use tokio_util::sync::CancellationToken;
