use std::collections::BTreeMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::errors::BackendError;

/// Identifier of a shard within a ring.
pub type NodeId = String;

/// Per-shard outcome of a broadcast operation, ordered by shard name.
pub type ShardResults = BTreeMap<NodeId, Result<(), BackendError>>;

/// Result of a routed operation that may be raced against a timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<T> {
    /// The backend answered in time.
    Ready(T),
    /// The timer fired first. The backend outcome is unknown.
    TimedOut,
    /// The caller's cancellation token fired first.
    Cancelled,
}

impl<T> Reply<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Reply::Ready(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Reply::Ready(value) => Some(value),
            _ => None,
        }
    }
}

/// What happens to a backend call that loses the race against its timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Leave the call running in the background and discard its result.
    #[default]
    Detach,
    /// Abort the call at its next suspension point.
    Abort,
}

/// Per-request knobs for keyed operations.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub on_timeout: TimeoutPolicy,
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout: Some(timeout), ..Self::default() }
    }

    pub fn abort_on_timeout(mut self) -> Self {
        self.on_timeout = TimeoutPolicy::Abort;
        self
    }

    pub fn cancel_with(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}
