// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Consistent hash ring with weighted virtual nodes.

use crate::cluster::{ServerId, ServerInfo};
use fnv::FnvHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hasher;
use std::sync::Arc;

/// Virtual nodes per unit of weight.
pub const DEFAULT_REPLICAS: usize = 160;

/// Weights above this count as this much on the ring.
pub const MAX_RING_WEIGHT: u32 = 64;

/// Maps hash keys onto a weighted set of server ids.
///
/// Adding or removing a node only inserts or deletes that node's virtual nodes,
/// so only the keys owned by it move.
#[derive(Debug, Clone)]
pub struct HashRing {
    replicas: usize,
    ring: BTreeMap<u64, ServerId>,
    nodes: HashMap<ServerId, u32>,
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(DEFAULT_REPLICAS)
    }
}

impl HashRing {
    /// Returns an empty ring with `replicas` virtual nodes per unit of weight.
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas: replicas.max(1),
            ring: BTreeMap::new(),
            nodes: HashMap::new(),
        }
    }

    /// Add a node. A weight of 0 leaves the ring untouched.
    pub fn add(&mut self, id: ServerId, weight: u32) {
        if weight == 0 || self.nodes.contains_key(&id) {
            return;
        }
        for i in 0..self.points(weight) {
            self.ring.insert(hash_key(&format!("{id}#{i}")), id.clone());
        }
        self.nodes.insert(id, weight);
    }

    /// Remove a node.
    pub fn remove(&mut self, id: &str) {
        let Some(weight) = self.nodes.remove(id) else {
            return;
        };
        for i in 0..self.points(weight) {
            let point = hash_key(&format!("{id}#{i}"));
            if self.ring.get(&point).is_some_and(|owner| owner.as_str() == id) {
                self.ring.remove(&point);
            }
        }
    }

    /// Bring the ring in line with `servers`, touching only the nodes that
    /// joined, left, or changed weight.
    pub fn sync(&mut self, servers: &[Arc<ServerInfo>]) {
        let next: HashMap<&str, u32> = servers.iter().filter(|s| s.weight > 0).map(|s| (s.id.as_str(), s.weight)).collect();
        let stale: Vec<ServerId> = self
            .nodes
            .iter()
            .filter(|(id, weight)| next.get(id.as_str()) != Some(*weight))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.remove(id);
        }
        for server in servers {
            self.add(server.id.clone(), server.weight);
        }
    }

    fn points(&self, weight: u32) -> usize {
        self.replicas * weight.min(MAX_RING_WEIGHT) as usize
    }

    /// The node owning `key`.
    pub fn get(&self, key: &str) -> Option<&ServerId> {
        let point = hash_key(key);
        self.ring
            .range(point..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, id)| id)
    }

    /// Whether `id` is on the ring.
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of nodes on the ring.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the ring has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// FNV-1a 64 followed by the splitmix64 finalizer; FNV alone clusters on
/// short keys that differ only in their last bytes.
pub fn hash_key(key: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(key.as_bytes());
    let mut z = hasher.finish();
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::tests::servers;

    fn owners(ring: &HashRing, keys: &[String]) -> Vec<ServerId> {
        keys.iter().map(|k| ring.get(k).cloned().unwrap()).collect()
    }

    #[test]
    fn test_empty_ring() {
        let ring = HashRing::default();
        assert!(ring.get("uid-1").is_none());
        assert!(ring.is_empty());
    }

    #[test]
    fn test_lookup_is_stable() {
        let mut ring = HashRing::default();
        ring.sync(&servers(&[("chat-1", 1), ("chat-2", 1), ("chat-3", 1)]));
        let first = ring.get("uid-1024").cloned();
        for _ in 0..100 {
            assert_eq!(ring.get("uid-1024").cloned(), first);
        }
    }

    #[test]
    fn test_remove_moves_only_owned_keys() {
        let n = 5;
        let spec = [("chat-1", 1), ("chat-2", 1), ("chat-3", 1), ("chat-4", 1), ("chat-5", 1)];
        let mut ring = HashRing::default();
        ring.sync(&servers(&spec));
        let keys: Vec<String> = (0..10_000).map(|i| format!("uid-{i}")).collect();
        let before = owners(&ring, &keys);

        ring.sync(&servers(&spec[..4]));
        assert!(!ring.contains("chat-5"));
        let after = owners(&ring, &keys);

        let mut moved = 0;
        for (b, a) in before.iter().zip(after.iter()) {
            if b != a {
                assert_eq!(b.as_str(), "chat-5");
                moved += 1;
            }
        }
        let share = moved as f64 / keys.len() as f64;
        assert!(share > 0.0);
        assert!(share <= 1.0 / n as f64 + 0.1, "moved share {share}");
    }

    #[test]
    fn test_add_moves_only_to_new_node() {
        let mut ring = HashRing::default();
        ring.sync(&servers(&[("chat-1", 1), ("chat-2", 1), ("chat-3", 1)]));
        let keys: Vec<String> = (0..5_000).map(|i| format!("room-{i}")).collect();
        let before = owners(&ring, &keys);

        ring.add(ServerId::from_static_str("chat-4"), 1);
        let after = owners(&ring, &keys);
        for (b, a) in before.iter().zip(after.iter()) {
            if b != a {
                assert_eq!(a.as_str(), "chat-4");
            }
        }
    }

    #[test]
    fn test_weight_shapes_share() {
        let mut ring = HashRing::default();
        ring.sync(&servers(&[("chat-1", 3), ("chat-2", 1), ("chat-0", 0)]));
        assert_eq!(ring.len(), 2);
        let keys: Vec<String> = (0..10_000).map(|i| format!("uid-{i}")).collect();
        let heavy = owners(&ring, &keys).iter().filter(|id| id.as_str() == "chat-1").count();
        assert!(heavy > keys.len() / 2, "heavy node got {heavy}");
    }

    #[test]
    fn test_sync_picks_up_weight_change() {
        let mut ring = HashRing::new(10);
        ring.sync(&servers(&[("chat-1", 1), ("chat-2", 1)]));
        assert_eq!(ring.ring.len(), 20);
        ring.sync(&servers(&[("chat-1", 2), ("chat-2", 1)]));
        assert_eq!(ring.ring.len(), 30);
    }

    #[test]
    fn test_huge_weight_is_capped() {
        let mut ring = HashRing::new(10);
        ring.sync(&servers(&[("chat-1", u32::MAX), ("chat-2", 1)]));
        assert_eq!(ring.ring.len(), 10 * MAX_RING_WEIGHT as usize + 10);
        ring.remove("chat-1");
        assert_eq!(ring.ring.len(), 10);
    }
}
