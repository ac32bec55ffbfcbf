// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Consistent-hash balance implemention

use super::ring::{HashRing, DEFAULT_REPLICAS};
use super::Balance;
use crate::cluster::{ServerId, ServerInfo};
use crate::error::RouteError;
use dashmap::DashMap;
use faststr::FastStr;
use std::sync::Arc;

/// Hashes the call's key onto one ring per server type.
///
/// Each ring is synced with the observed server list before every lookup, so a
/// membership change only moves the keys of the nodes that joined or left.
#[derive(Debug)]
pub struct ConsistentHashBalance {
    replicas: usize,
    rings: DashMap<FastStr, HashRing>,
}

impl Default for ConsistentHashBalance {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsistentHashBalance {
    /// Returns a balancer with [`DEFAULT_REPLICAS`] virtual nodes per weight unit.
    pub fn new() -> Self {
        Self::with_replicas(DEFAULT_REPLICAS)
    }

    /// Returns a balancer with `replicas` virtual nodes per weight unit.
    pub fn with_replicas(replicas: usize) -> Self {
        Self {
            replicas,
            rings: DashMap::new(),
        }
    }
}

impl Balance for ConsistentHashBalance {
    fn pick(&self, server_type: &FastStr, servers: &[Arc<ServerInfo>], key: &str) -> Result<ServerId, RouteError> {
        let mut ring = self.rings.entry(server_type.clone()).or_insert_with(|| HashRing::new(self.replicas));
        ring.sync(servers);
        ring.get(key).cloned().ok_or_else(|| RouteError::NoServerAvailable(server_type.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::tests::servers;

    #[test]
    fn test_same_key_same_server() {
        let balance = ConsistentHashBalance::new();
        let chat = FastStr::from_static_str("chat");
        let list = servers(&[("A", 1), ("B", 1), ("C", 1)]);
        let first = balance.pick(&chat, &list, "uid-42").unwrap();
        for _ in 0..50 {
            assert_eq!(balance.pick(&chat, &list, "uid-42").unwrap(), first);
        }
    }

    #[test]
    fn test_removed_server_is_never_chosen() {
        let balance = ConsistentHashBalance::new();
        let chat = FastStr::from_static_str("chat");
        let full = servers(&[("A", 1), ("B", 1), ("C", 1)]);
        let keys: Vec<String> = (0..1000).map(|i| format!("uid-{i}")).collect();
        let before: Vec<ServerId> = keys.iter().map(|k| balance.pick(&chat, &full, k).unwrap()).collect();

        let without_b = servers(&[("A", 1), ("C", 1)]);
        for (key, owner) in keys.iter().zip(before.iter()) {
            let now = balance.pick(&chat, &without_b, key).unwrap();
            assert_ne!(now.as_str(), "B");
            if owner.as_str() != "B" {
                assert_eq!(&now, owner);
            }
        }
    }

    #[test]
    fn test_empty_list_is_an_error() {
        let balance = ConsistentHashBalance::new();
        let chat = FastStr::from_static_str("chat");
        assert!(matches!(balance.pick(&chat, &[], "uid-1"), Err(RouteError::NoServerAvailable(_))));
    }
}
