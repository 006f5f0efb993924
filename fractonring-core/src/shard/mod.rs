pub mod hasher;
pub mod ring;
pub mod router;
pub mod types;

pub use ring::RendezvousRing;
pub use router::ShardRouter;
pub use types::{NodeId, Reply, RequestOptions, ShardResults, TimeoutPolicy};
