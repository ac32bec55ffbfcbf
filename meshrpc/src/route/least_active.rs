// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Least-active balance implemention

use super::Balance;
use crate::cluster::{ServerId, ServerInfo};
use crate::error::RouteError;
use dashmap::DashMap;
use faststr::FastStr;
use std::sync::Arc;

/// In-flight request counters per server id, as seen by one client.
#[derive(Debug, Default)]
pub struct ActiveRequests {
    counts: DashMap<ServerId, usize>,
}

impl ActiveRequests {
    /// Returns empty counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request to `server_id` until the returned guard drops.
    pub fn enter(self: &Arc<Self>, server_id: ServerId) -> ActiveGuard {
        *self.counts.entry(server_id.clone()).or_default() += 1;
        ActiveGuard {
            active: self.clone(),
            server_id,
        }
    }

    /// Requests currently in flight to `server_id`.
    pub fn count(&self, server_id: &str) -> usize {
        self.counts.get(server_id).map(|c| *c).unwrap_or(0)
    }
}

/// Decrements the in-flight counter of one server on drop.
#[derive(Debug)]
pub struct ActiveGuard {
    active: Arc<ActiveRequests>,
    server_id: ServerId,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Some(mut count) = self.active.counts.get_mut(&self.server_id) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Chooses the server with the fewest in-flight requests, ties broken by list order.
#[derive(Debug)]
pub struct LeastActiveBalance {
    active: Arc<ActiveRequests>,
}

impl LeastActiveBalance {
    /// Returns a [`LeastActiveBalance`] reading the given counters.
    pub fn new(active: Arc<ActiveRequests>) -> Self {
        Self { active }
    }
}

impl Balance for LeastActiveBalance {
    fn pick(&self, server_type: &FastStr, servers: &[Arc<ServerInfo>], _key: &str) -> Result<ServerId, RouteError> {
        servers
            .iter()
            .enumerate()
            .min_by_key(|(index, server)| (self.active.count(&server.id), *index))
            .map(|(_, server)| server.id.clone())
            .ok_or_else(|| RouteError::NoServerAvailable(server_type.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::tests::servers;

    #[test]
    fn test_fewest_in_flight_wins() {
        let active = Arc::new(ActiveRequests::new());
        let balance = LeastActiveBalance::new(active.clone());
        let list = servers(&[("A", 1), ("B", 1), ("C", 1)]);
        let chat = FastStr::from_static_str("chat");

        assert_eq!(balance.pick(&chat, &list, "").unwrap().as_str(), "A");

        let _a = active.enter(ServerId::from_static_str("A"));
        let _b = active.enter(ServerId::from_static_str("B"));
        assert_eq!(balance.pick(&chat, &list, "").unwrap().as_str(), "C");

        let c = active.enter(ServerId::from_static_str("C"));
        let _c2 = active.enter(ServerId::from_static_str("C"));
        assert_eq!(balance.pick(&chat, &list, "").unwrap().as_str(), "A");
        drop(c);
        assert_eq!(active.count("C"), 1);
    }

    #[test]
    fn test_guard_releases_count() {
        let active = Arc::new(ActiveRequests::new());
        {
            let _guard = active.enter(ServerId::from_static_str("A"));
            assert_eq!(active.count("A"), 1);
        }
        assert_eq!(active.count("A"), 0);
        assert_eq!(active.count("unknown"), 0);
    }

    #[test]
    fn test_empty_list_is_an_error() {
        let balance = LeastActiveBalance::new(Arc::new(ActiveRequests::new()));
        let chat = FastStr::from_static_str("chat");
        assert!(matches!(balance.pick(&chat, &[], ""), Err(RouteError::NoServerAvailable(_))));
    }
}
