//! Rendezvous (highest random weight) ring.
//!
//! Every key is owned by the node whose score `mix(hash(key) ^ hash(node))`
//! is the highest. Node hashes are computed once on insertion, so a lookup
//! against N nodes costs one string hash and N mixer rounds.
//!
//! Adding a node only moves keys onto the new node; removing a node only
//! moves the keys it owned. Keys never shuffle between two unaffected nodes.

use std::collections::HashMap;

use tracing::debug;

use crate::errors::RingError;
use crate::shard::hasher::{hash_str, score};
use crate::shard::types::NodeId;

#[derive(Debug, Clone, Default)]
pub struct RendezvousRing {
    /// node id -> slot
    index: HashMap<NodeId, usize>,
    identifiers: Vec<NodeId>,
    /// `base_hashes[i] == hash_str(&identifiers[i])`
    base_hashes: Vec<u64>,
}

impl RendezvousRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a ring from an ordered node list. Slot order follows the input.
    pub fn from_nodes<I, S>(nodes: I) -> Result<Self, RingError>
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        let nodes = nodes.into_iter();
        let mut ring = Self::with_capacity(nodes.size_hint().0);
        for node in nodes {
            ring.add(node)?;
        }
        Ok(ring)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity),
            identifiers: Vec::with_capacity(capacity),
            base_hashes: Vec::with_capacity(capacity),
        }
    }

    /// Returns the node owning `key`, or `None` if the ring is empty.
    ///
    /// Ties are won by the earliest slot: a later node needs a strictly
    /// greater score to take the key.
    pub fn lookup(&self, key: &str) -> Option<&str> {
        let (&first, rest) = self.base_hashes.split_first()?;

        let khash = hash_str(key);
        let mut best_slot = 0;
        let mut best_score = score(khash, first);

        for (offset, &nhash) in rest.iter().enumerate() {
            let s = score(khash, nhash);
            if s > best_score {
                best_slot = offset + 1;
                best_score = s;
            }
        }

        Some(&self.identifiers[best_slot])
    }

    /// Appends `node` in a new slot.
    ///
    /// A node that is already present is rejected and the ring is left as is.
    pub fn add(&mut self, node: impl Into<NodeId>) -> Result<(), RingError> {
        let node = node.into();
        if self.index.contains_key(&node) {
            return Err(RingError::DuplicateNode(node));
        }

        let slot = self.identifiers.len();
        self.base_hashes.push(hash_str(&node));
        self.identifiers.push(node.clone());
        debug!(node = %node, slot, "added node to ring");
        self.index.insert(node, slot);
        Ok(())
    }

    /// Removes `node` by moving the last slot into its place.
    ///
    /// Returns `false` if the node was not a member.
    pub fn remove(&mut self, node: &str) -> bool {
        let Some(slot) = self.index.remove(node) else {
            return false;
        };

        self.identifiers.swap_remove(slot);
        self.base_hashes.swap_remove(slot);

        // the former last node now lives in `slot`
        if let Some(moved) = self.identifiers.get(slot) {
            self.index.insert(moved.clone(), slot);
        }

        debug!(node, slot, "removed node from ring");
        true
    }

    pub fn contains(&self, node: &str) -> bool {
        self.index.contains_key(node)
    }

    /// Node identifiers in slot order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.identifiers
    }

    pub fn slot_of(&self, node: &str) -> Option<usize> {
        self.index.get(node).copied()
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::hasher::mix;
    use std::collections::HashMap;

    fn three() -> RendezvousRing {
        RendezvousRing::from_nodes(["shard1", "shard2", "shard3"]).unwrap()
    }

    fn assert_consistent(ring: &RendezvousRing) {
        assert_eq!(ring.identifiers.len(), ring.base_hashes.len());
        assert_eq!(ring.identifiers.len(), ring.index.len());
        for (id, &slot) in &ring.index {
            assert_eq!(&ring.identifiers[slot], id);
            assert_eq!(ring.base_hashes[slot], hash_str(id));
        }
    }

    #[test]
    fn empty_ring_returns_none() {
        let ring = RendezvousRing::new();
        assert!(ring.is_empty());
        assert_eq!(ring.lookup("foo"), None);
        assert_eq!(ring.lookup(""), None);
    }

    #[test]
    fn single_node_owns_every_key() {
        let ring = RendezvousRing::from_nodes(["only"]).unwrap();
        for i in 0..1000 {
            assert_eq!(ring.lookup(&format!("key-{i}")), Some("only"));
        }
    }

    #[test]
    fn golden_foo_resolves_to_shard1() {
        let key_hash = 3728699739546630719u64;
        assert_eq!(hash_str("foo"), key_hash);

        let s1 = mix(key_hash ^ 1153070855979829696);
        let s2 = mix(key_hash ^ 6217921348380604097);
        let s3 = mix(key_hash ^ 5365826590678743835);
        assert_eq!(s1, 17343391007686759860);
        assert_eq!(s2, 15126199428585761803);
        assert_eq!(s3, 14158469994121150851);

        assert_eq!(three().lookup("foo"), Some("shard1"));
    }

    #[test]
    fn golden_assignments_for_three_shards() {
        let ring = three();
        assert_eq!(ring.lookup("bar"), Some("shard2"));
        assert_eq!(ring.lookup("baz"), Some("shard3"));
        assert_eq!(ring.lookup("user:42"), Some("shard2"));
        assert_eq!(ring.lookup("session:abc"), Some("shard1"));
        assert_eq!(ring.lookup("hello"), Some("shard3"));
        assert_eq!(ring.lookup(""), Some("shard3"));
    }

    #[test]
    fn remove_keeps_keys_of_other_shards() {
        let mut ring = three();
        assert!(ring.remove("shard2"));
        assert_consistent(&ring);

        assert_eq!(ring.lookup("foo"), Some("shard1"));
        assert_eq!(ring.lookup("baz"), Some("shard3"));
        // keys owned by the removed shard move elsewhere
        assert_eq!(ring.lookup("bar"), Some("shard3"));
        assert_eq!(ring.lookup("user:42"), Some("shard3"));
    }

    #[test]
    fn lookup_is_deterministic_across_instances() {
        let a = three();
        let b = three();
        for i in 0..5000 {
            let key = format!("k{i}");
            assert_eq!(a.lookup(&key), b.lookup(&key));
            assert_eq!(a.lookup(&key), a.lookup(&key));
        }
    }

    #[test]
    fn lookup_always_returns_a_member() {
        let ring = RendezvousRing::from_nodes((0..7).map(|i| format!("node-{i}"))).unwrap();
        for i in 0..5000 {
            let owner = ring.lookup(&format!("item/{i}")).unwrap();
            assert!(ring.contains(owner));
        }
    }

    #[test]
    fn duplicate_add_is_rejected_without_side_effects() {
        let mut ring = three();
        let err = ring.add("shard2").unwrap_err();
        assert_eq!(err, RingError::DuplicateNode("shard2".into()));
        assert_eq!(ring.len(), 3);
        assert_consistent(&ring);

        assert!(RendezvousRing::from_nodes(["a", "b", "a"]).is_err());
    }

    #[test]
    fn removing_unknown_node_is_a_noop() {
        let mut ring = three();
        assert!(!ring.remove("shard9"));
        assert_eq!(ring.nodes(), &["shard1", "shard2", "shard3"]);
        assert_consistent(&ring);
    }

    #[test]
    fn swap_remove_updates_moved_slot() {
        let mut ring = RendezvousRing::from_nodes(["a", "b", "c", "d"]).unwrap();
        assert!(ring.remove("b"));
        assert_eq!(ring.nodes(), &["a", "d", "c"]);
        assert_eq!(ring.slot_of("d"), Some(1));
        assert_eq!(ring.slot_of("b"), None);
        assert_consistent(&ring);

        // removing the last slot moves nothing
        assert!(ring.remove("c"));
        assert_eq!(ring.nodes(), &["a", "d"]);
        assert_consistent(&ring);

        assert!(ring.remove("a"));
        assert!(ring.remove("d"));
        assert!(ring.is_empty());
        assert_consistent(&ring);
        assert_eq!(ring.lookup("anything"), None);
    }

    #[test]
    fn remove_only_moves_keys_of_removed_node() {
        let nodes: Vec<String> = (0..8).map(|i| format!("cache-{i}")).collect();
        let mut ring = RendezvousRing::from_nodes(nodes.clone()).unwrap();

        let keys: Vec<String> = (0..10_000).map(|i| format!("obj:{i}")).collect();
        let before: Vec<String> =
            keys.iter().map(|k| ring.lookup(k).unwrap().to_owned()).collect();

        ring.remove("cache-3");
        assert_consistent(&ring);

        for (key, owner) in keys.iter().zip(&before) {
            let now = ring.lookup(key).unwrap();
            if owner != "cache-3" {
                assert_eq!(now, owner, "key {key} moved between unaffected nodes");
            } else {
                assert_ne!(now, "cache-3");
            }
        }
    }

    #[test]
    fn add_only_moves_keys_onto_new_node() {
        let mut ring = RendezvousRing::from_nodes((0..5).map(|i| format!("n{i}"))).unwrap();
        let keys: Vec<String> = (0..10_000).map(|i| format!("key-{i}")).collect();
        let before: Vec<String> =
            keys.iter().map(|k| ring.lookup(k).unwrap().to_owned()).collect();

        ring.add("n5").unwrap();
        assert_consistent(&ring);

        let mut moved = 0;
        for (key, owner) in keys.iter().zip(&before) {
            let now = ring.lookup(key).unwrap();
            if now != owner {
                assert_eq!(now, "n5");
                moved += 1;
            }
        }
        // roughly 1/6 of the keys
        assert!(moved > 1_000 && moved < 2_400, "moved {moved}");
    }

    #[test]
    fn remove_then_readd_restores_mapping() {
        let mut ring = RendezvousRing::from_nodes(["a", "b", "c", "d", "e"]).unwrap();
        let keys: Vec<String> = (0..5_000).map(|i| format!("doc-{i}")).collect();
        let before: Vec<String> =
            keys.iter().map(|k| ring.lookup(k).unwrap().to_owned()).collect();

        ring.remove("b");
        ring.add("b").unwrap();
        assert_consistent(&ring);
        assert_eq!(ring.slot_of("b"), Some(4));

        for (key, owner) in keys.iter().zip(&before) {
            assert_eq!(ring.lookup(key).unwrap(), owner);
        }
    }

    #[test]
    fn load_is_roughly_uniform() {
        for n in [3usize, 5, 10] {
            let ring =
                RendezvousRing::from_nodes((0..n).map(|i| format!("shard{}", i + 1))).unwrap();
            let samples = 100_000;
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for i in 0..samples {
                *counts.entry(ring.lookup(&format!("key-{i}")).unwrap()).or_default() += 1;
            }

            assert_eq!(counts.len(), n);
            let expected = samples as f64 / n as f64;
            for (node, count) in counts {
                let deviation = (count as f64 - expected).abs() / expected;
                assert!(deviation < 0.10, "{node} got {count}, expected ~{expected}");
            }
        }
    }
}
