//! Routes keyed operations to the shard the ring selects.
//!
//! The router owns one backend handle per shard. Ring and handle map live
//! together in an immutable [`Topology`] snapshot: topology changes build a
//! new snapshot and swap it in, so a lookup sees either the old or the new
//! node set in full.

use std::collections::HashMap;
use std::future::{Future, pending};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::backend::{Backend, PONG, RespBackend};
use crate::config::RingConfig;
use crate::errors::{BackendError, RingError, RouterError};
use crate::shard::ring::RendezvousRing;
use crate::shard::types::{NodeId, Reply, RequestOptions, ShardResults, TimeoutPolicy};

struct Topology<B> {
    ring: RendezvousRing,
    shards: HashMap<NodeId, Arc<B>>,
}

impl<B> Clone for Topology<B> {
    fn clone(&self) -> Self {
        Self { ring: self.ring.clone(), shards: self.shards.clone() }
    }
}

impl<B> Default for Topology<B> {
    fn default() -> Self {
        Self { ring: RendezvousRing::new(), shards: HashMap::new() }
    }
}

pub struct ShardRouter<B: Backend> {
    topology: RwLock<Arc<Topology<B>>>,
    default_timeout: Option<Duration>,
}

impl<B: Backend> Default for ShardRouter<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardRouter<RespBackend> {
    /// Opens one RESP handle per configured shard and probes them all.
    ///
    /// See [`ShardRouter::initialize`] for how probe failures are reported.
    pub async fn connect(config: &RingConfig) -> Result<(Self, Vec<Result<(), BackendError>>), RouterError> {
        let shards = config.shards.iter().map(|shard| {
            let backend = RespBackend::new(shard.descriptor.clone())
                .with_connect_timeout(config.connect_timeout)
                .with_io_timeout(config.io_timeout);
            (shard.name.clone(), backend)
        });

        let (router, errors) = Self::initialize(shards).await?;
        Ok((router.with_default_timeout(config.request_timeout), errors))
    }
}

impl<B: Backend> ShardRouter<B> {
    /// Creates a router with no shards.
    pub fn new() -> Self {
        Self { topology: RwLock::new(Arc::new(Topology::default())), default_timeout: None }
    }

    /// Builds a router from named backends and pings every one of them.
    ///
    /// All probes run concurrently and are awaited before the router is
    /// returned. The error list is aligned with the input order. A shard that
    /// fails its probe still joins the ring. Duplicate names are rejected
    /// before anything is probed.
    pub async fn initialize<I>(shards: I) -> Result<(Self, Vec<Result<(), BackendError>>), RouterError>
    where
        I: IntoIterator<Item = (NodeId, B)>,
    {
        let mut topology = Topology::default();
        let mut order = Vec::new();
        for (name, backend) in shards {
            topology.ring.add(name.clone())?;
            topology.shards.insert(name.clone(), Arc::new(backend));
            order.push(name);
        }

        let mut probes: FuturesUnordered<_> = order
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let handle = Arc::clone(&topology.shards[name]);
                async move { (idx, probe(handle.as_ref()).await) }
            })
            .collect();

        let mut errors: Vec<Result<(), BackendError>> = order.iter().map(|_| Ok(())).collect();
        while let Some((idx, result)) = probes.next().await {
            if let Err(e) = &result {
                warn!(shard = %order[idx], error = %e, "shard failed its initial probe");
            }
            errors[idx] = result;
        }

        let failed = errors.iter().filter(|r| r.is_err()).count();
        info!(shards = order.len(), failed, "ring initialized");

        let router = Self { topology: RwLock::new(Arc::new(topology)), default_timeout: None };
        Ok((router, errors))
    }

    /// Timeout used by keyed operations whose options carry none.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    fn snapshot(&self) -> Arc<Topology<B>> {
        Arc::clone(&self.topology.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Applies `change` to a copy of the current topology. The copy is
    /// published only if `change` succeeds.
    fn update<T, E>(&self, change: impl FnOnce(&mut Topology<B>) -> Result<T, E>) -> Result<T, E> {
        let mut current = self.topology.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Topology::clone(&current);
        let out = change(&mut next)?;
        *current = Arc::new(next);
        Ok(out)
    }

    /// Name of the shard owning `key`, or `None` if there are no shards.
    pub fn shard_for(&self, key: &str) -> Option<NodeId> {
        self.snapshot().ring.lookup(key).map(str::to_owned)
    }

    /// Shard names in ring slot order.
    pub fn shards(&self) -> Vec<NodeId> {
        self.snapshot().ring.nodes().to_vec()
    }

    /// Handle of the named shard.
    pub fn handle(&self, shard: &str) -> Option<Arc<B>> {
        self.snapshot().shards.get(shard).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().ring.is_empty()
    }

    /// Adds a shard. Only keys the new shard wins move to it.
    pub fn add_shard(&self, name: impl Into<NodeId>, backend: B) -> Result<(), RingError> {
        let name = name.into();
        self.update(|topology| {
            topology.ring.add(name.clone())?;
            topology.shards.insert(name.clone(), Arc::new(backend));
            Ok::<(), RingError>(())
        })?;
        info!(shard = %name, "shard added");
        Ok(())
    }

    /// Removes a shard and closes its handle.
    ///
    /// Returns `false` if no such shard exists. Operations already holding
    /// the handle finish against it or fail with [`BackendError::Closed`].
    pub async fn remove_shard(&self, name: &str) -> bool {
        let removed = self.update(|topology| {
            let handle = topology.shards.remove(name).ok_or(())?;
            topology.ring.remove(name);
            Ok(handle)
        });

        match removed {
            Ok(handle) => {
                handle.close().await;
                info!(shard = %name, "shard removed");
                true
            }
            Err(()) => false,
        }
    }

    fn route(&self, key: &str) -> Result<(NodeId, Arc<B>), RouterError> {
        let topology = self.snapshot();
        let shard = topology.ring.lookup(key).ok_or(RouterError::NoShards)?;
        let handle = topology.shards.get(shard).cloned().ok_or(RouterError::NoShards)?;
        Ok((shard.to_owned(), handle))
    }

    /// Reads `key` from its shard. `Ready(None)` means the key does not exist.
    pub async fn get(&self, key: &str, options: &RequestOptions) -> Result<Reply<Option<Bytes>>, RouterError> {
        let owned_key = key.to_owned();
        self.dispatch("get", key, options, move |handle| async move {
            handle.get(&owned_key).await
        })
        .await
    }

    /// Writes `key` on its shard with an expiry in seconds.
    ///
    /// Under the default timeout policy a `TimedOut` write may still land.
    pub async fn set(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        expiry_secs: u64,
        options: &RequestOptions,
    ) -> Result<Reply<()>, RouterError> {
        let owned_key = key.to_owned();
        let value = value.into();
        self.dispatch("set", key, options, move |handle| async move {
            handle.set(&owned_key, value, expiry_secs).await
        })
        .await
    }

    async fn dispatch<T, F, Fut>(
        &self,
        op: &'static str,
        key: &str,
        options: &RequestOptions,
        call: F,
    ) -> Result<Reply<T>, RouterError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<B>) -> Fut,
        Fut: Future<Output = Result<T, BackendError>> + Send + 'static,
    {
        let (shard, handle) = self.route(key)?;
        let id = Ulid::new();
        let timeout = options.timeout.or(self.default_timeout);
        debug!(op, %id, shard = %shard, key, "dispatching");

        if timeout.is_none() && options.cancel.is_none() {
            return call(handle)
                .await
                .map(Reply::Ready)
                .map_err(|source| RouterError::Backend { shard, source });
        }

        let mut task = tokio::spawn(call(handle));
        let raced = tokio::select! {
            biased;
            joined = &mut task => Some(joined),
            _ = expire(timeout) => None,
            _ = cancelled(options.cancel.as_ref()) => {
                task.abort();
                debug!(op, %id, shard = %shard, "cancelled");
                return Ok(Reply::Cancelled);
            }
        };

        match raced {
            Some(Ok(result)) => {
                result.map(Reply::Ready).map_err(|source| RouterError::Backend { shard, source })
            }
            Some(Err(join_err)) if join_err.is_panic() => Err(RouterError::TaskPanicked { shard }),
            Some(Err(_)) => Ok(Reply::Cancelled),
            None => {
                match options.on_timeout {
                    // dropping the JoinHandle detaches the task
                    TimeoutPolicy::Detach => {
                        debug!(op, %id, shard = %shard, "timed out, left running")
                    }
                    TimeoutPolicy::Abort => {
                        task.abort();
                        debug!(op, %id, shard = %shard, "timed out, aborted");
                    }
                }
                Ok(Reply::TimedOut)
            }
        }
    }

    /// Flushes every shard. Bypasses the ring.
    ///
    /// Shards are flushed concurrently; a failure is recorded against its own
    /// shard and does not stop the others.
    pub async fn flush_all(&self) -> ShardResults {
        let results = self.broadcast(|handle| async move { handle.flush_all().await }).await;
        for (shard, result) in &results {
            if let Err(e) = result {
                warn!(shard = %shard, error = %e, "flush failed");
            }
        }
        results
    }

    /// Pings every shard. Failures are reported only; membership is unchanged.
    pub async fn health_check(&self) -> ShardResults {
        self.broadcast(|handle| async move { probe(handle.as_ref()).await }).await
    }

    async fn broadcast<F, Fut>(&self, call: F) -> ShardResults
    where
        F: Fn(Arc<B>) -> Fut,
        Fut: Future<Output = Result<(), BackendError>>,
    {
        let topology = self.snapshot();
        let mut inflight: FuturesUnordered<_> = topology
            .ring
            .nodes()
            .iter()
            .filter_map(|name| {
                let handle = topology.shards.get(name).cloned()?;
                let name = name.clone();
                let fut = call(handle);
                Some(async move { (name, fut.await) })
            })
            .collect();

        let mut results = ShardResults::new();
        while let Some((name, result)) = inflight.next().await {
            results.insert(name, result);
        }
        results
    }
}

async fn probe<B: Backend>(backend: &B) -> Result<(), BackendError> {
    let reply = backend.ping().await?;
    if reply == PONG { Ok(()) } else { Err(BackendError::BadPing(reply)) }
}

async fn expire(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => pending().await,
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => pending().await,
    }
}
