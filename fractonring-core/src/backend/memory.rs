use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use crate::backend::{Backend, PONG};
use crate::errors::BackendError;

#[derive(Debug)]
struct StoreObject {
    data: Bytes,
    ttl: Duration,
    created_at: Instant,
}

impl StoreObject {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.created_at + self.ttl
    }
}

/// In-process backend holding its keys in a map.
///
/// Latency and failures can be injected, which makes it the stand-in shard
/// for tests and for dry runs of the CLI.
#[derive(Debug)]
pub struct MemoryBackend {
    db: Mutex<HashMap<String, StoreObject>>,
    latency: Option<Duration>,
    ping_reply: String,
    failing: AtomicBool,
    closed: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            db: Mutex::new(HashMap::new()),
            latency: None,
            ping_reply: PONG.to_owned(),
            failing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Delays every operation by `latency` before it touches the store.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_ping_reply(mut self, reply: impl Into<String>) -> Self {
        self.ping_reply = reply.into();
        self
    }

    /// While set, every operation fails with [`BackendError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Reads a key without going through the backend contract.
    pub fn peek(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        self.db()
            .get(key)
            .filter(|obj| !obj.is_expired(now))
            .map(|obj| obj.data.clone())
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.db().values().filter(|obj| !obj.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn db(&self) -> MutexGuard<'_, HashMap<String, StoreObject>> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self) -> Result<(), BackendError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable);
        }
        Ok(())
    }
}

impl Backend for MemoryBackend {
    async fn ping(&self) -> Result<String, BackendError> {
        self.enter().await?;
        Ok(self.ping_reply.clone())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        self.enter().await?;
        let now = Instant::now();
        let mut db = self.db();
        let expired = match db.get(key) {
            Some(obj) if !obj.is_expired(now) => return Ok(Some(obj.data.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            db.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, expiry_secs: u64) -> Result<(), BackendError> {
        self.enter().await?;
        if expiry_secs == 0 {
            return Err(BackendError::Server("ERR invalid expire time in 'set' command".into()));
        }
        let obj = StoreObject {
            data: value,
            ttl: Duration::from_secs(expiry_secs),
            created_at: Instant::now(),
        };
        self.db().insert(key.to_owned(), obj);
        Ok(())
    }

    async fn flush_all(&self) -> Result<(), BackendError> {
        self.enter().await?;
        self.db().clear();
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get() {
        let backend = MemoryBackend::new();
        backend.set("k", Bytes::from_static(b"v"), 60).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(Bytes::from_static(b"v")));
        assert_eq!(backend.get("missing").await.unwrap(), None);
        assert_eq!(backend.ping().await.unwrap(), "PONG");
    }

    #[tokio::test(start_paused = true)]
    async fn keys_expire() {
        let backend = MemoryBackend::new();
        backend.set("session", Bytes::from_static(b"x"), 2).await.unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(backend.get("session").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(backend.get("session").await.unwrap().is_none());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn zero_expiry_is_rejected() {
        let backend = MemoryBackend::new();
        let err = backend.set("k", Bytes::from_static(b"v"), 0).await.unwrap_err();
        assert!(matches!(err, BackendError::Server(_)));
        assert!(backend.peek("k").is_none());
    }

    #[tokio::test]
    async fn failing_and_closed_backends_refuse_work() {
        let backend = MemoryBackend::new();
        backend.set_failing(true);
        assert!(matches!(backend.ping().await, Err(BackendError::Unavailable)));

        backend.set_failing(false);
        backend.flush_all().await.unwrap();

        backend.close().await;
        assert!(backend.is_closed());
        assert!(matches!(backend.get("k").await, Err(BackendError::Closed)));
    }
}
