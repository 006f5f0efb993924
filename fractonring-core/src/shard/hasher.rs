//! Hash primitives shared by every participant of a ring.
//!
//! Both functions are part of the routing contract: a process that computes
//! either one differently will route keys to different shards.

use twox_hash::XxHash64;

/// Seed used for every node and key hash.
pub const HASH_SEED: u64 = 0;

/// Multiplier of the xorshift-multiply finalizer.
pub const MIX_MULTIPLIER: u64 = 2685821657736338717;

/// XXH64 of the UTF-8 bytes of `s`.
///
/// Matches Go's `xxhash.Sum64String` and any other XXH64 with seed 0. The
/// bytes are fed raw, not through `Hash for str`, which would append a
/// terminator byte.
#[inline]
pub fn hash_str(s: &str) -> u64 {
    XxHash64::oneshot(HASH_SEED, s.as_bytes())
}

/// Xorshift-multiply avalanche finalizer.
///
/// Combines a key hash and a node hash (XORed together by the caller) into a
/// single rendezvous score.
#[inline]
pub fn mix(mut x: u64) -> u64 {
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    x.wrapping_mul(MIX_MULTIPLIER)
}

/// Rendezvous score of a key hash against a node hash.
#[inline]
pub fn score(key_hash: u64, node_hash: u64) -> u64 {
    mix(key_hash ^ node_hash)
}
