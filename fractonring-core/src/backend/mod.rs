//! Key-value backends the router can dispatch to.
//!
//! The router only needs four operations from a shard plus a way to release
//! it. Handles are shared behind an `Arc`, so every operation takes `&self`
//! and returns a `Send` future that can be moved onto a spawned task.

pub mod codec;
mod memory;
mod resp;

use std::future::Future;

use bytes::Bytes;

use crate::errors::BackendError;

pub use memory::MemoryBackend;
pub use resp::RespBackend;

/// Reply a healthy backend gives to `PING`.
pub const PONG: &str = "PONG";

pub trait Backend: Send + Sync + 'static {
    /// Probes the backend. A healthy backend answers `PONG`.
    fn ping(&self) -> impl Future<Output = Result<String, BackendError>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>, BackendError>> + Send;

    /// Stores `value` under `key`, expiring after `expiry_secs` seconds.
    fn set(
        &self,
        key: &str,
        value: Bytes,
        expiry_secs: u64,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Deletes every key held by the backend.
    fn flush_all(&self) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Releases the handle. Later calls fail with [`BackendError::Closed`].
    fn close(&self) -> impl Future<Output = ()> + Send;
}
